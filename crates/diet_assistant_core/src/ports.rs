//! crates/diet_assistant_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

use crate::domain::{
    ChatSession, GenerationRequest, HealthProfile, ModelChunk, Role, StoredTurn, UserRecord,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("No model API key is available for this call")]
    MissingCredential,
    #[error("External model call failed: {0}")]
    ExternalCall(String),
    #[error("Unsupported content: {0}")]
    UnsupportedContent(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// The chunk stream returned by a streaming model call. Dropping it aborts the call.
pub type ModelChunkStream = Pin<Box<dyn Stream<Item = PortResult<ModelChunk>> + Send>>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Creates a user. Fails with `AlreadyExists` when the username is taken.
    async fn register(
        &self,
        username: &str,
        secret: &str,
        api_key: Option<&str>,
        health: &HealthProfile,
    ) -> PortResult<Uuid>;

    /// Returns the user when the credentials match, `None` otherwise.
    async fn authenticate(&self, username: &str, secret: &str) -> PortResult<Option<UserRecord>>;

    async fn update_health(&self, user_id: Uuid, health: &HealthProfile) -> PortResult<()>;

    async fn get_user(&self, user_id: Uuid) -> PortResult<UserRecord>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, user_id: Uuid, title: &str) -> PortResult<ChatSession>;

    /// All sessions of a user, most recent first.
    async fn list_sessions(&self, user_id: Uuid) -> PortResult<Vec<ChatSession>>;

    async fn get_session(&self, session_id: Uuid) -> PortResult<ChatSession>;

    /// Purges every turn of a session. The session itself is kept.
    async fn delete_all_turns(&self, session_id: Uuid) -> PortResult<()>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists one flattened turn. The store assigns the timestamp.
    async fn append(&self, session_id: Uuid, user_id: Uuid, role: Role, text: &str)
        -> PortResult<()>;

    /// The session's turns in ascending timestamp order.
    async fn history(&self, session_id: Uuid) -> PortResult<Vec<StoredTurn>>;
}

#[async_trait]
pub trait AuthSessionStore: Send + Sync {
    async fn create_auth_session(
        &self,
        auth_session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Returns the owning user of a live (unexpired) auth session.
    async fn validate_auth_session(&self, auth_session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, auth_session_id: &str) -> PortResult<()>;
}

#[async_trait]
pub trait GenerativeModelService: Send + Sync {
    /// Opens a streaming generation call. Errors before the first chunk are
    /// returned directly; errors mid-stream arrive as stream items.
    async fn stream_generate(&self, request: GenerationRequest) -> PortResult<ModelChunkStream>;
}
