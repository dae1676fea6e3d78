//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! It binds the connection to a chat session and delegates answers to the
//! chat task, one at a time.

use crate::web::{
    chat_task::{answer_process, send_message, ChatRequest},
    protocol::{ClientMessage, ServerMessage, TranscriptTurn},
    state::{AppState, SessionState},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use diet_assistant_core::domain::DEFAULT_SESSION_TITLE;
use diet_assistant_core::ports::PortResult;
use futures::stream::{SplitSink, StreamExt};
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// The answer currently streaming on a connection, if any.
struct RunningAnswer {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

impl RunningAnswer {
    fn is_active(running: &Option<RunningAnswer>) -> bool {
        running.as_ref().is_some_and(|answer| !answer.handle.is_finished())
    }
}

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user_id))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user_id: Uuid) {
    info!("New WebSocket connection established for user: {}", user_id);

    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));

    // --- 1. Initialization Phase ---
    let session_state_lock = match receiver.next().await {
        Some(Ok(Message::Text(init_json))) => {
            match serde_json::from_str::<ClientMessage>(init_json.as_str()) {
                Ok(ClientMessage::Init {
                    session_id,
                    api_key,
                }) => match SessionState::new(&app_state, user_id, session_id).await {
                    Ok(mut state) => {
                        state.api_key_override = api_key.filter(|key| !key.trim().is_empty());
                        Arc::new(Mutex::new(state))
                    }
                    Err(e) => {
                        error!("Failed to initialize session state: {:?}", e);
                        report_error(&ws_sender, format!("Failed to load session: {}", e)).await;
                        return;
                    }
                },
                _ => {
                    error!("First message was not a valid Init message.");
                    report_error(&ws_sender, "The first message must be 'init'.".to_string()).await;
                    return;
                }
            }
        }
        _ => {
            error!("Client disconnected before sending Init message.");
            return;
        }
    };

    {
        let session = session_state_lock.lock().await;
        if announce_session(&ws_sender, &session).await.is_err() {
            error!("Failed to send session initialized message.");
            return;
        }
    }

    // --- 2. Main Message Loop ---
    let mut running: Option<RunningAnswer> = None;

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                handle_text_message(
                    text.as_str(),
                    &app_state,
                    &session_state_lock,
                    &ws_sender,
                    &mut running,
                )
                .await;
            }
            Message::Close(_) => {
                info!("Client sent close message.");
                break;
            }
            _ => {}
        }
    }

    // --- 3. Cleanup ---
    if let Some(answer) = running {
        answer.token.cancel();
        answer.handle.abort();
    }
    info!("WebSocket connection closed.");
}

/// Helper function to handle the logic for different `ClientMessage` variants.
async fn handle_text_message(
    text: &str,
    app_state: &Arc<AppState>,
    session_state_lock: &Arc<Mutex<SessionState>>,
    ws_sender: &WsSender,
    running: &mut Option<RunningAnswer>,
) {
    let client_msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            report_error(ws_sender, format!("Unrecognized message: {}", e)).await;
            return;
        }
    };

    let request = match client_msg {
        ClientMessage::Chat {
            text,
            images,
            multimedia,
        } => ChatRequest::Chat {
            text,
            images,
            multimedia,
        },
        ClientMessage::AnalyzeDish { image } => ChatRequest::AnalyzeDish { image },
        ClientMessage::RecommendRecipes { image } => ChatRequest::RecommendRecipes { image },
        ClientMessage::ShoppingList { items, days } => ChatRequest::ShoppingList { items, days },
        ClientMessage::StopAnswer => {
            match running {
                Some(answer) if !answer.handle.is_finished() => {
                    info!("StopAnswer received. Cancelling the answer.");
                    answer.token.cancel();
                }
                _ => warn!("StopAnswer received with no answer streaming."),
            }
            return;
        }
        ClientMessage::Init { .. } => {
            warn!("Received subsequent Init message, which is ignored.");
            return;
        }
        other => {
            if RunningAnswer::is_active(running) {
                report_error(ws_sender, "Wait for the current answer to finish.".to_string()).await;
                return;
            }
            if let Err(e) = handle_session_command(other, app_state, session_state_lock, ws_sender).await {
                error!("Session command failed: {:?}", e);
                report_error(ws_sender, e.to_string()).await;
            }
            return;
        }
    };

    if RunningAnswer::is_active(running) {
        report_error(ws_sender, "An answer is already streaming.".to_string()).await;
        return;
    }

    let token = CancellationToken::new();
    let handle = {
        let app_state = app_state.clone();
        let session_state_lock = session_state_lock.clone();
        let ws_sender = ws_sender.clone();
        let token = token.clone();
        tokio::spawn(async move {
            match answer_process(app_state, session_state_lock, ws_sender.clone(), request, token).await {
                Ok(outcome) => info!("Answer finished: {:?}", outcome),
                Err(e) => {
                    error!("Error in answer process: {:?}", e);
                    report_error(&ws_sender, e.to_string()).await;
                }
            }
        })
    };
    *running = Some(RunningAnswer { handle, token });
}

/// Commands that act on the session itself rather than asking for an answer.
async fn handle_session_command(
    command: ClientMessage,
    app_state: &Arc<AppState>,
    session_state_lock: &Arc<Mutex<SessionState>>,
    ws_sender: &WsSender,
) -> PortResult<()> {
    let mut session = session_state_lock.lock().await;
    match command {
        ClientMessage::NewChat => {
            let chat = app_state
                .sessions
                .create_session(session.user.id, DEFAULT_SESSION_TITLE)
                .await?;
            session.conversation.switch_to(chat.id);
            info!("Switched to new chat session {}", chat.id);
            announce_session(ws_sender, &session).await
        }
        ClientMessage::ResetConversation => {
            session.conversation.reset(app_state.sessions.as_ref()).await?;
            send_message(ws_sender, &ServerMessage::ConversationReset).await
        }
        ClientMessage::SetApiKey { api_key } => {
            let api_key = api_key.trim();
            session.api_key_override = (!api_key.is_empty()).then(|| api_key.to_string());
            info!("Connection API key {}", if api_key.is_empty() { "cleared" } else { "set" });
            Ok(())
        }
        other => {
            warn!("Unexpected session command: {:?}", other);
            Ok(())
        }
    }
}

async fn announce_session(ws_sender: &WsSender, session: &SessionState) -> PortResult<()> {
    let message = ServerMessage::SessionInitialized {
        session_id: session.conversation.session_id(),
        turns: session
            .conversation
            .turns()
            .iter()
            .map(TranscriptTurn::from)
            .collect(),
    };
    send_message(ws_sender, &message).await
}

async fn report_error(ws_sender: &WsSender, message: String) {
    if let Err(e) = send_message(ws_sender, &ServerMessage::Error { message }).await {
        warn!("Could not report error to client: {}", e);
    }
}
