//! crates/diet_assistant_core/src/relay.rs
//!
//! Drives a streaming model call for a conversation, hands each fragment to
//! the caller as it arrives, and persists the complete answer as an assistant
//! turn once the model is done.

use async_stream::try_stream;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

use crate::conversation::Conversation;
use crate::domain::{GenerationRequest, InlineData, ModelChunk, ModelConfig, ModelTurn, Turn};
use crate::normalizer::normalize_turns;
use crate::ports::{GenerativeModelService, MessageStore, PortResult};

/// Number of base64 characters shown in an inline-media placeholder.
const MEDIA_PREVIEW_CHARS: usize = 30;

//=========================================================================================
// The Relay
//=========================================================================================

#[derive(Clone)]
pub struct ResponseRelay {
    model: Arc<dyn GenerativeModelService>,
    messages: Arc<dyn MessageStore>,
}

impl ResponseRelay {
    pub fn new(model: Arc<dyn GenerativeModelService>, messages: Arc<dyn MessageStore>) -> Self {
        Self { model, messages }
    }

    /// Streams the model's answer fragment by fragment.
    ///
    /// Without `prompt_override` the request carries the whole normalized
    /// conversation; with it, a single user turn holding just that prompt.
    ///
    /// The stream is lazy and finite. Only after the model's stream is
    /// exhausted is the accumulated text stored and appended to
    /// `conversation`. If any step fails the error is yielded, the stream
    /// ends, and nothing is persisted. Dropping the stream early also
    /// persists nothing and closes the underlying call.
    pub fn stream<'a>(
        &'a self,
        conversation: &'a mut Conversation,
        config: &'a ModelConfig,
        api_key: String,
        prompt_override: Option<String>,
    ) -> impl Stream<Item = PortResult<String>> + Send + 'a {
        try_stream! {
            let contents = match prompt_override {
                Some(prompt) => vec![ModelTurn::user_text(prompt)],
                None => normalize_turns(conversation.turns())?,
            };
            let request = GenerationRequest {
                model: config.model.clone(),
                temperature: config.temperature,
                api_key,
                contents,
            };
            debug!("Opening model stream: {:?}", request);

            let mut chunks = self.model.stream_generate(request).await?;
            let mut answer = String::new();
            let mut fragments = 0usize;

            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                if let Some(fragment) = fragment_from_chunk(chunk) {
                    answer.push_str(&fragment);
                    fragments += 1;
                    yield fragment;
                }
            }

            conversation
                .record(self.messages.as_ref(), Turn::assistant_text(answer))
                .await?;
            info!(
                "Model answer for session {} complete ({} fragments).",
                conversation.session_id(),
                fragments
            );
        }
    }
}

//=========================================================================================
// Chunk Handling
//=========================================================================================

/// Text wins over inline data; a chunk with neither produces nothing.
fn fragment_from_chunk(chunk: ModelChunk) -> Option<String> {
    match chunk {
        ModelChunk {
            text: Some(text), ..
        } if !text.is_empty() => Some(text),
        ModelChunk {
            inline_data: Some(data),
            ..
        } => Some(describe_inline_data(&data)),
        _ => None,
    }
}

/// A short stand-in for binary media: a kind label and a base64 preview.
pub fn describe_inline_data(data: &InlineData) -> String {
    let encoded = STANDARD.encode(&data.data);
    let preview: String = encoded.chars().take(MEDIA_PREVIEW_CHARS).collect();
    let kind = match data.mime_type.split('/').next().unwrap_or_default() {
        "audio" => "Audio",
        "video" => "Video",
        "image" => "Image",
        _ => "Media",
    };
    format!("[{} received: {}...]", kind, preview)
}
