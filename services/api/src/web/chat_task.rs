//! services/api/src/web/chat_task.rs
//!
//! This module contains the asynchronous "worker" function responsible for
//! one answer: store the user's turn, stream the model's reply to the client
//! fragment by fragment, and stop early when asked to.

use crate::config::Config;
use crate::web::{
    protocol::ServerMessage,
    state::{AppState, SessionState},
};
use axum::extract::ws::Message;
use diet_assistant_core::{
    domain::{HealthProfile, ModelConfig, Part},
    normalizer::decode_data_uri,
    ports::{PortError, PortResult},
    prompts,
};
use futures::{pin_mut, Sink, SinkExt, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the client asked the assistant to do.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatRequest {
    Chat {
        text: String,
        images: Vec<String>,
        multimedia: bool,
    },
    AnalyzeDish { image: String },
    RecommendRecipes { image: String },
    ShoppingList { items: String, days: u32 },
}

/// Represents how an answer finished.
#[derive(Debug, PartialEq, Eq)]
pub enum AnswerOutcome {
    Completed,
    Cancelled,
}

/// A request resolved into the turn to record and the model call to make.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedAnswer {
    pub parts: Vec<Part>,
    pub prompt_override: Option<String>,
    pub model: ModelConfig,
}

pub fn prepare(
    request: ChatRequest,
    health: &HealthProfile,
    config: &Config,
) -> PortResult<PreparedAnswer> {
    let chat = |parts| PreparedAnswer {
        parts,
        prompt_override: None,
        model: config.chat_model.clone(),
    };

    let prepared = match request {
        ChatRequest::Chat {
            text,
            images,
            multimedia,
        } => {
            let mut parts: Vec<Part> = images.into_iter().map(Part::image).collect();
            if !text.trim().is_empty() {
                parts.insert(0, Part::text(text));
            }
            if parts.is_empty() {
                return Err(PortError::UnsupportedContent("The message is empty".to_string()));
            }
            PreparedAnswer {
                parts,
                prompt_override: None,
                model: if multimedia {
                    config.realtime_model.clone()
                } else {
                    config.chat_model.clone()
                },
            }
        }
        ChatRequest::AnalyzeDish { image } => chat(vec![
            Part::image(image),
            Part::text(prompts::dish_calories_prompt(health)),
        ]),
        ChatRequest::RecommendRecipes { image } => chat(vec![
            Part::image(image),
            Part::text(prompts::recipes_from_ingredients_prompt(health)),
        ]),
        ChatRequest::ShoppingList { items, days } => {
            if items.trim().is_empty() || days == 0 {
                return Err(PortError::UnsupportedContent(
                    "A shopping list needs items and at least one day".to_string(),
                ));
            }
            PreparedAnswer {
                parts: vec![Part::text(prompts::shopping_list_request(&items, days))],
                prompt_override: Some(prompts::shopping_list_prompt(&items, days, health)),
                model: config.chat_model.clone(),
            }
        }
    };

    // Reject unreadable images before anything is stored.
    for part in &prepared.parts {
        if let Part::ImageUrl { image_url } = part {
            decode_data_uri(&image_url.url)?;
        }
    }
    Ok(prepared)
}

/// Serializes and sends one message to the client.
pub async fn send_message<S>(ws_sender: &Mutex<S>, message: &ServerMessage) -> PortResult<()>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let json = serde_json::to_string(message)
        .map_err(|e| PortError::Unexpected(format!("Failed to serialize message: {}", e)))?;
    ws_sender
        .lock()
        .await
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| PortError::Unexpected(format!("Failed to send message: {}", e)))
}

/// The main asynchronous task for answering a single request.
///
/// Holds the session lock for its whole duration, so answers on one
/// connection never interleave.
pub async fn answer_process<S>(
    app_state: Arc<AppState>,
    session_state_lock: Arc<Mutex<SessionState>>,
    ws_sender: Arc<Mutex<S>>,
    request: ChatRequest,
    token: CancellationToken,
) -> PortResult<AnswerOutcome>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    let start_time = Instant::now();
    let mut session = session_state_lock.lock().await;

    // REST calls may have changed the profile or the transcript since the last answer.
    let user_id = session.user.id;
    session.user = app_state.profiles.get_user(user_id).await?;
    session
        .conversation
        .refresh(app_state.messages.as_ref())
        .await?;

    let prepared = prepare(request, &session.user.health, &app_state.config)?;
    let api_key = session.api_key(app_state.config.gemini_api_key.as_deref())?;

    session
        .conversation
        .record_user_turn(app_state.messages.as_ref(), prepared.parts)
        .await?;
    send_message(&ws_sender, &ServerMessage::AnswerStarted).await?;

    let stream = app_state.relay.stream(
        &mut session.conversation,
        &prepared.model,
        api_key,
        prepared.prompt_override,
    );
    pin_mut!(stream);

    let mut fragments = 0usize;
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!("Answer cancelled after {} fragments.", fragments);
                send_message(&ws_sender, &ServerMessage::AnswerCancelled).await?;
                return Ok(AnswerOutcome::Cancelled);
            }
            next = stream.next() => match next {
                Some(Ok(text)) => {
                    fragments += 1;
                    if let Err(e) = send_message(&ws_sender, &ServerMessage::Fragment { text }).await {
                        // The client is gone; dropping the stream aborts the model call.
                        warn!("Stopping answer: {}", e);
                        return Err(e);
                    }
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }
    }

    send_message(&ws_sender, &ServerMessage::AnswerEnded).await?;
    debug!("Answer streamed in {:?}", start_time.elapsed());
    Ok(AnswerOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::DbAdapter;
    use async_trait::async_trait;
    use diet_assistant_core::domain::{GenerationRequest, ModelChunk, ModelPart, Role};
    use diet_assistant_core::ports::{
        GenerativeModelService, MessageStore, ModelChunkStream, ProfileStore, SessionStore,
    };
    use diet_assistant_core::ResponseRelay;
    use futures::channel::mpsc;
    use futures::stream;
    use tempfile::TempDir;
    use uuid::Uuid;

    const PNG_URI: &str = "data:image/png;base64,iVBORw0KGgo=";

    /// Streams fixed text chunks, optionally never finishing.
    struct FakeModel {
        chunks: Vec<&'static str>,
        hang_after: bool,
        last_request: std::sync::Mutex<Option<GenerationRequest>>,
    }

    #[async_trait]
    impl GenerativeModelService for FakeModel {
        async fn stream_generate(&self, request: GenerationRequest) -> PortResult<ModelChunkStream> {
            *self.last_request.lock().unwrap() = Some(request);
            let chunks = stream::iter(
                self.chunks
                    .iter()
                    .map(|text| Ok(ModelChunk::text(*text)))
                    .collect::<Vec<_>>(),
            );
            if self.hang_after {
                Ok(Box::pin(chunks.chain(stream::pending())))
            } else {
                Ok(Box::pin(chunks))
            }
        }
    }

    struct Harness {
        _dir: TempDir,
        db: Arc<DbAdapter>,
        model: Arc<FakeModel>,
        app_state: Arc<AppState>,
        session: Arc<Mutex<SessionState>>,
    }

    async fn harness(chunks: Vec<&'static str>, hang_after: bool, server_key: Option<&str>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("chat.db").display());
        let db = Arc::new(DbAdapter::connect(&url, 2).await.unwrap());
        db.run_migrations().await.unwrap();

        let model = Arc::new(FakeModel {
            chunks,
            hang_after,
            last_request: std::sync::Mutex::new(None),
        });
        let config = Config::from_lookup(|key| match key {
            "GEMINI_API_KEY" => server_key.map(str::to_string),
            _ => None,
        })
        .unwrap();
        let app_state = Arc::new(AppState {
            profiles: db.clone(),
            sessions: db.clone(),
            messages: db.clone(),
            auth_sessions: db.clone(),
            relay: Arc::new(ResponseRelay::new(model.clone(), db.clone())),
            config: Arc::new(config),
        });

        let user_id = db
            .register("ana", "secret", None, &HealthProfile::default())
            .await
            .unwrap();
        let session = SessionState::new(&app_state, user_id, None).await.unwrap();

        Harness {
            _dir: dir,
            db,
            model,
            app_state,
            session: Arc::new(Mutex::new(session)),
        }
    }

    fn decode(message: Message) -> serde_json::Value {
        match message {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    async fn session_id(h: &Harness) -> Uuid {
        h.session.lock().await.conversation.session_id()
    }

    #[tokio::test]
    async fn streams_fragments_and_stores_both_turns() {
        let h = harness(vec!["Hel", "lo"], false, Some("server-key")).await;
        let (tx, rx) = mpsc::unbounded();

        let outcome = answer_process(
            h.app_state.clone(),
            h.session.clone(),
            Arc::new(Mutex::new(tx)),
            ChatRequest::Chat {
                text: "hi".to_string(),
                images: vec![],
                multimedia: false,
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, AnswerOutcome::Completed);

        let types: Vec<String> = rx
            .map(decode)
            .map(|v| v["type"].as_str().unwrap().to_string())
            .collect()
            .await;
        assert_eq!(
            types,
            vec!["answer_started", "fragment", "fragment", "answer_ended"]
        );

        let history = h.db.history(session_id(&h).await).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].text, "Hello");
        let request = h.model.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.api_key, "server-key");
    }

    #[tokio::test]
    async fn stop_answer_cancels_without_storing_the_reply() {
        let h = harness(vec!["partial"], true, Some("server-key")).await;
        let (tx, mut rx) = mpsc::unbounded();
        let token = CancellationToken::new();

        let task = tokio::spawn(answer_process(
            h.app_state.clone(),
            h.session.clone(),
            Arc::new(Mutex::new(tx)),
            ChatRequest::Chat {
                text: "hi".to_string(),
                images: vec![],
                multimedia: false,
            },
            token.clone(),
        ));

        assert_eq!(decode(rx.next().await.unwrap())["type"], "answer_started");
        assert_eq!(decode(rx.next().await.unwrap())["text"], "partial");
        token.cancel();

        assert_eq!(task.await.unwrap().unwrap(), AnswerOutcome::Cancelled);
        assert_eq!(decode(rx.next().await.unwrap())["type"], "answer_cancelled");

        let history = h.db.history(session_id(&h).await).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
    }

    #[tokio::test]
    async fn missing_key_fails_before_anything_is_stored() {
        let h = harness(vec!["unused"], false, None).await;
        let (tx, _rx) = mpsc::unbounded();

        let err = answer_process(
            h.app_state.clone(),
            h.session.clone(),
            Arc::new(Mutex::new(tx)),
            ChatRequest::Chat {
                text: "hi".to_string(),
                images: vec![],
                multimedia: false,
            },
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PortError::MissingCredential));
        assert!(h.db.history(session_id(&h).await).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shopping_list_sends_one_shot_prompt() {
        let h = harness(vec!["Day 1: rice"], false, Some("k")).await;
        let (tx, _rx) = mpsc::unbounded();
        h.session.lock().await.api_key_override = Some("conn-key".to_string());

        answer_process(
            h.app_state.clone(),
            h.session.clone(),
            Arc::new(Mutex::new(tx)),
            ChatRequest::ShoppingList {
                items: "rice, beans".to_string(),
                days: 2,
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let request = h.model.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.api_key, "conn-key");
        assert_eq!(request.contents.len(), 1);
        let history = h.db.history(session_id(&h).await).await.unwrap();
        assert_eq!(
            history[0].text,
            "Generate recipes based on the shopping list: rice, beans for 2 days."
        );
    }

    fn chat(text: &str) -> ChatRequest {
        ChatRequest::Chat {
            text: text.to_string(),
            images: vec![],
            multimedia: false,
        }
    }

    #[tokio::test]
    async fn turns_deleted_over_rest_are_not_resent() {
        let h = harness(vec!["ok"], false, Some("k")).await;
        let (tx, _rx) = mpsc::unbounded();
        let ws_sender = Arc::new(Mutex::new(tx));

        answer_process(
            h.app_state.clone(),
            h.session.clone(),
            ws_sender.clone(),
            chat("old"),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        h.db.delete_all_turns(session_id(&h).await).await.unwrap();

        answer_process(
            h.app_state.clone(),
            h.session.clone(),
            ws_sender,
            chat("new"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let request = h.model.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.contents.len(), 1);
        assert_eq!(request.contents[0].parts, vec![ModelPart::Text("new".to_string())]);
        let history = h.db.history(session_id(&h).await).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text, "new");
    }

    #[tokio::test]
    async fn health_updated_mid_connection_reaches_the_prompt() {
        let h = harness(vec!["about 400 kcal"], false, Some("k")).await;
        let (tx, _rx) = mpsc::unbounded();
        let user_id = h.session.lock().await.user.id;
        let health = HealthProfile {
            age: 63,
            ..HealthProfile::default()
        };
        h.db.update_health(user_id, &health).await.unwrap();

        answer_process(
            h.app_state.clone(),
            h.session.clone(),
            Arc::new(Mutex::new(tx)),
            ChatRequest::AnalyzeDish {
                image: PNG_URI.to_string(),
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let history = h.db.history(session_id(&h).await).await.unwrap();
        assert!(history[0].text.contains("age 63"));
        assert_eq!(h.session.lock().await.user.health, health);
    }

    #[test]
    fn prepare_builds_the_expected_turns() {
        let config = Config::from_lookup(|_| None).unwrap();
        let health = HealthProfile::default();

        let dish = prepare(
            ChatRequest::AnalyzeDish {
                image: PNG_URI.to_string(),
            },
            &health,
            &config,
        )
        .unwrap();
        assert_eq!(dish.parts.len(), 2);
        assert!(dish.prompt_override.is_none());

        let media = prepare(
            ChatRequest::Chat {
                text: "what do you see?".to_string(),
                images: vec![PNG_URI.to_string()],
                multimedia: true,
            },
            &health,
            &config,
        )
        .unwrap();
        assert_eq!(media.model, config.realtime_model);
        assert_eq!(media.parts[0], Part::text("what do you see?"));
    }

    #[test]
    fn prepare_rejects_empty_and_unreadable_input() {
        let config = Config::from_lookup(|_| None).unwrap();
        let health = HealthProfile::default();

        let empty = ChatRequest::Chat {
            text: "  ".to_string(),
            images: vec![],
            multimedia: false,
        };
        assert!(matches!(
            prepare(empty, &health, &config),
            Err(PortError::UnsupportedContent(_))
        ));

        let broken = ChatRequest::RecommendRecipes {
            image: "data:image/png;base64,@@@".to_string(),
        };
        assert!(matches!(
            prepare(broken, &health, &config),
            Err(PortError::UnsupportedContent(_))
        ));

        let no_days = ChatRequest::ShoppingList {
            items: "eggs".to_string(),
            days: 0,
        };
        assert!(prepare(no_days, &health, &config).is_err());
    }
}
