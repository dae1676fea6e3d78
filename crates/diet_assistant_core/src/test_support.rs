//! In-memory fakes of the ports, shared by the unit tests of this crate.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::{ChatSession, GenerationRequest, ModelChunk, Role, StoredTurn};
use crate::ports::{
    GenerativeModelService, MessageStore, ModelChunkStream, PortError, PortResult, SessionStore,
};

/// The 8-byte PNG signature as a data URI.
pub const TINY_PNG_URI: &str = "data:image/png;base64,iVBORw0KGgo=";

#[derive(Default)]
pub struct InMemoryStore {
    turns: Mutex<Vec<(Uuid, StoredTurn)>>,
    sessions: Mutex<Vec<ChatSession>>,
}

impl InMemoryStore {
    pub fn turn_count(&self, session_id: Uuid) -> usize {
        self.turns
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == session_id)
            .count()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn append(&self, session_id: Uuid, _user_id: Uuid, role: Role, text: &str) -> PortResult<()> {
        self.turns.lock().unwrap().push((
            session_id,
            StoredTurn {
                role,
                text: text.to_string(),
                created_at: Utc::now(),
            },
        ));
        Ok(())
    }

    async fn history(&self, session_id: Uuid) -> PortResult<Vec<StoredTurn>> {
        Ok(self
            .turns
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == session_id)
            .map(|(_, turn)| turn.clone())
            .collect())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn create_session(&self, user_id: Uuid, title: &str) -> PortResult<ChatSession> {
        let session = ChatSession {
            id: Uuid::new_v4(),
            user_id,
            title: title.to_string(),
            created_at: Utc::now(),
        };
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }

    async fn list_sessions(&self, user_id: Uuid) -> PortResult<Vec<ChatSession>> {
        let mut sessions: Vec<_> = self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.reverse();
        Ok(sessions)
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<ChatSession> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))
    }

    async fn delete_all_turns(&self, session_id: Uuid) -> PortResult<()> {
        self.turns.lock().unwrap().retain(|(id, _)| *id != session_id);
        Ok(())
    }
}

/// A model that replays a fixed script of chunks and records the request.
pub struct ScriptedModel {
    script: Mutex<Option<Vec<PortResult<ModelChunk>>>>,
    fail_on_open: bool,
    pub last_request: Mutex<Option<GenerationRequest>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<PortResult<ModelChunk>>) -> Self {
        Self {
            script: Mutex::new(Some(script)),
            fail_on_open: false,
            last_request: Mutex::new(None),
        }
    }

    pub fn failing_on_open() -> Self {
        Self {
            script: Mutex::new(None),
            fail_on_open: true,
            last_request: Mutex::new(None),
        }
    }
}

#[async_trait]
impl GenerativeModelService for ScriptedModel {
    async fn stream_generate(&self, request: GenerationRequest) -> PortResult<ModelChunkStream> {
        *self.last_request.lock().unwrap() = Some(request);
        if self.fail_on_open {
            return Err(PortError::ExternalCall("connection refused".to_string()));
        }
        let script = self.script.lock().unwrap().take().unwrap_or_default();
        Ok(Box::pin(stream::iter(script)))
    }
}
