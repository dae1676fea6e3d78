//! services/api/src/web/state.rs
//!
//! Defines the application's shared and connection-specific states.

use crate::config::Config;
use diet_assistant_core::domain::{UserRecord, DEFAULT_SESSION_TITLE};
use diet_assistant_core::ports::{
    AuthSessionStore, MessageStore, PortError, PortResult, ProfileStore, SessionStore,
};
use diet_assistant_core::{Conversation, ResponseRelay};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub profiles: Arc<dyn ProfileStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub messages: Arc<dyn MessageStore>,
    pub auth_sessions: Arc<dyn AuthSessionStore>,
    pub relay: Arc<ResponseRelay>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Fails with `Unauthorized` when the session belongs to someone else.
    pub async fn owned_session(&self, user_id: Uuid, session_id: Uuid) -> PortResult<()> {
        let session = self.sessions.get_session(session_id).await?;
        if session.user_id != user_id {
            return Err(PortError::Unauthorized);
        }
        Ok(())
    }
}

//=========================================================================================
// SessionState (Specific to One WebSocket Connection)
//=========================================================================================

/// The state for a single, active WebSocket connection.
pub struct SessionState {
    pub user: UserRecord,
    pub conversation: Conversation,
    /// Set by `init` or `set_api_key`; wins over every other key source.
    pub api_key_override: Option<String>,
}

impl SessionState {
    /// Loads the user and resumes `session_id`, or starts a fresh session.
    pub async fn new(
        app_state: &AppState,
        user_id: Uuid,
        session_id: Option<Uuid>,
    ) -> PortResult<Self> {
        let user = app_state.profiles.get_user(user_id).await?;
        let session_id = match session_id {
            Some(session_id) => {
                app_state.owned_session(user_id, session_id).await?;
                session_id
            }
            None => {
                let session = app_state
                    .sessions
                    .create_session(user_id, DEFAULT_SESSION_TITLE)
                    .await?;
                info!("Started session {} for user {}", session.id, user_id);
                session.id
            }
        };
        let conversation = Conversation::load(app_state.messages.as_ref(), user_id, session_id).await?;

        Ok(Self {
            user,
            conversation,
            api_key_override: None,
        })
    }

    pub fn api_key(&self, server_default: Option<&str>) -> PortResult<String> {
        resolve_api_key(
            self.api_key_override.as_deref(),
            self.user.api_key.as_deref(),
            server_default,
        )
    }
}

/// Connection override, then the user's stored key, then the server default.
pub fn resolve_api_key(
    connection: Option<&str>,
    stored: Option<&str>,
    server_default: Option<&str>,
) -> PortResult<String> {
    [connection, stored, server_default]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|key| !key.is_empty())
        .map(str::to_string)
        .ok_or(PortError::MissingCredential)
}
