//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the API server
//! for the diet assistant chat.

use diet_assistant_core::domain::{Role, Turn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================
// NOTE: Images travel inline as `data:<mime>;base64,<payload>` URIs.
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Must be the first message on the connection. Without a `session_id`
    /// a new chat session is started.
    Init {
        #[serde(default)]
        session_id: Option<Uuid>,
        #[serde(default)]
        api_key: Option<String>,
    },

    /// A free-form chat turn. `multimedia` selects the realtime model.
    Chat {
        #[serde(default)]
        text: String,
        #[serde(default)]
        images: Vec<String>,
        #[serde(default)]
        multimedia: bool,
    },

    /// A photo of a dish; the assistant estimates its calories.
    AnalyzeDish { image: String },

    /// A photo of ingredients; the assistant suggests recipes.
    RecommendRecipes { image: String },

    /// A shopping list turned into one recipe per day.
    ShoppingList { items: String, days: u32 },

    /// Stops the answer currently streaming.
    StopAnswer,

    NewChat,

    /// Deletes every turn of the current session.
    ResetConversation,

    SetApiKey { api_key: String },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// A turn of the transcript as the client displays it.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TranscriptTurn {
    pub role: Role,
    pub text: String,
}

impl From<&Turn> for TranscriptTurn {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role,
            text: turn.flatten(),
        }
    }
}

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms which session the connection is now bound to, with its transcript.
    SessionInitialized {
        session_id: Uuid,
        turns: Vec<TranscriptTurn>,
    },

    /// The user turn was stored and the model call is starting.
    AnswerStarted,

    /// One piece of the streamed answer.
    Fragment { text: String },

    /// The full answer was received and stored.
    AnswerEnded,

    /// The answer was stopped; nothing of it was stored.
    AnswerCancelled,

    ConversationReset,

    /// Reports an error to the client, which should display an error message.
    Error { message: String },
}
