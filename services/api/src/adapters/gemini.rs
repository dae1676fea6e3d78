//! services/api/src/adapters/gemini.rs
//!
//! This module contains the adapter for Google's Gemini API. It implements the
//! `GenerativeModelService` port by calling `streamGenerateContent` in SSE mode
//! and turning every returned content part into a `ModelChunk`.

use async_stream::try_stream;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use diet_assistant_core::domain::{GenerationRequest, ModelChunk, ModelPart, ModelTurn};
use diet_assistant_core::ports::{GenerativeModelService, ModelChunkStream, PortError, PortResult};
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::adapters::sse::SseLineBuffer;

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

/// A part is either text or inline binary data; unknown kinds have neither.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<GeminiBlob>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiBlob {
    mime_type: String,
    /// Base64 encoded.
    data: String,
}

#[derive(Debug, Deserialize)]
struct StreamingResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}

//=========================================================================================
// The Adapter
//=========================================================================================

#[derive(Clone)]
pub struct GeminiAdapter {
    client: Client,
    api_base: String,
}

impl GeminiAdapter {
    pub fn new(api_base: impl Into<String>, timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            api_base: api_base.into(),
        })
    }

    fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/models/{}:streamGenerateContent",
            self.api_base.trim_end_matches('/'),
            model
        )
    }
}

impl fmt::Debug for GeminiAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiAdapter")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl GenerativeModelService for GeminiAdapter {
    async fn stream_generate(&self, request: GenerationRequest) -> PortResult<ModelChunkStream> {
        if request.api_key.trim().is_empty() {
            return Err(PortError::MissingCredential);
        }
        let body = build_request(&request);
        debug!("Starting streaming request to Gemini ({:?})", request);

        let response = self
            .client
            .post(self.stream_url(&request.model))
            .query(&[("alt", "sse")])
            .header("x-goog-api-key", &request.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PortError::ExternalCall(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(map_api_error(status.as_u16(), &error_text));
        }

        Ok(Box::pin(chunk_stream(response)))
    }
}

//=========================================================================================
// Request and Response Mapping
//=========================================================================================

fn build_request(request: &GenerationRequest) -> GeminiRequest {
    GeminiRequest {
        contents: request.contents.iter().map(to_wire_content).collect(),
        generation_config: GenerationConfig {
            temperature: request.temperature,
        },
    }
}

fn to_wire_content(turn: &ModelTurn) -> GeminiContent {
    let parts = turn
        .parts
        .iter()
        .map(|part| match part {
            ModelPart::Text(text) => GeminiPart {
                text: Some(text.clone()),
                ..Default::default()
            },
            ModelPart::Image(image) => GeminiPart {
                inline_data: Some(GeminiBlob {
                    mime_type: image.mime_type.clone(),
                    data: STANDARD.encode(&image.bytes),
                }),
                ..Default::default()
            },
        })
        .collect();
    GeminiContent {
        role: Some(turn.role.as_str().to_string()),
        parts,
    }
}

/// Dropping the returned stream drops the response and closes the connection.
fn chunk_stream(response: reqwest::Response) -> impl Stream<Item = PortResult<ModelChunk>> + Send {
    try_stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer = SseLineBuffer::new();

        while let Some(next) = bytes.next().await {
            let next = next.map_err(|e| PortError::ExternalCall(format!("Stream read error: {}", e)))?;
            for payload in buffer.feed(&next) {
                for chunk in parse_event(&payload)? {
                    yield chunk;
                }
            }
        }
        if let Some(payload) = buffer.flush() {
            for chunk in parse_event(&payload)? {
                yield chunk;
            }
        }
    }
}

/// One SSE payload becomes one chunk per content part of the first candidate.
fn parse_event(payload: &str) -> PortResult<Vec<ModelChunk>> {
    let response: StreamingResponse = serde_json::from_str(payload).map_err(|e| {
        warn!("Failed to parse streaming chunk: {}", e);
        PortError::ExternalCall(format!("Malformed streaming event from model: {}", e))
    })?;
    if let Some(error) = response.error {
        return Err(PortError::ExternalCall(error.message));
    }

    let parts = response
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts)
        .unwrap_or_default();

    parts
        .into_iter()
        .map(|part| {
            let inline_data = match part.inline_data {
                Some(blob) => {
                    let data = STANDARD.decode(blob.data.as_bytes()).map_err(|e| {
                        PortError::ExternalCall(format!("Invalid inline data from model: {}", e))
                    })?;
                    Some((blob.mime_type, data))
                }
                None => None,
            };
            Ok(match (part.text, inline_data) {
                (text, Some((mime_type, data))) => ModelChunk {
                    text,
                    ..ModelChunk::inline(mime_type, data)
                },
                (Some(text), None) => ModelChunk::text(text),
                (None, None) => ModelChunk::default(),
            })
        })
        .collect()
}

/// Surfaces Gemini's own error message when the body carries one.
fn map_api_error(status: u16, response_text: &str) -> PortError {
    let message = serde_json::from_str::<StreamingResponse>(response_text)
        .ok()
        .and_then(|r| r.error)
        .map_or_else(|| response_text.to_string(), |e| e.message);
    PortError::ExternalCall(format!("Gemini API error ({}): {}", status, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use diet_assistant_core::domain::{DecodedImage, ModelRole};
    use serde_json::json;

    #[test]
    fn request_uses_camel_case_wire_format() {
        let request = GenerationRequest {
            model: "gemini-2.0-flash".to_string(),
            temperature: 0.5,
            api_key: "secret".to_string(),
            contents: vec![
                ModelTurn {
                    role: ModelRole::User,
                    parts: vec![
                        ModelPart::Text("what is this?".to_string()),
                        ModelPart::Image(DecodedImage {
                            mime_type: "image/png".to_string(),
                            bytes: b"abc".to_vec(),
                        }),
                    ],
                },
                ModelTurn {
                    role: ModelRole::Model,
                    parts: vec![ModelPart::Text("a salad".to_string())],
                },
            ],
        };

        let body = serde_json::to_value(build_request(&request)).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [
                    {"role": "user", "parts": [
                        {"text": "what is this?"},
                        {"inlineData": {"mimeType": "image/png", "data": "YWJj"}}
                    ]},
                    {"role": "model", "parts": [{"text": "a salad"}]}
                ],
                "generationConfig": {"temperature": 0.5}
            })
        );
        assert!(!body.to_string().contains("secret"));
    }

    #[test]
    fn each_part_becomes_a_chunk() {
        let payload = json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"text": "Hello"},
                {"inlineData": {"mimeType": "audio/pcm", "data": "YWJj"}}
            ]}}]
        })
        .to_string();

        let chunks = parse_event(&payload).unwrap();
        assert_eq!(
            chunks,
            vec![
                ModelChunk::text("Hello"),
                ModelChunk::inline("audio/pcm", b"abc".to_vec())
            ]
        );
    }

    #[test]
    fn metadata_only_events_yield_nothing() {
        let payload = json!({"usageMetadata": {"totalTokenCount": 3}}).to_string();
        assert!(parse_event(&payload).unwrap().is_empty());
    }

    #[test]
    fn malformed_event_fails_the_stream() {
        assert!(matches!(
            parse_event(r#"{"candidates": [{"content""#),
            Err(PortError::ExternalCall(_))
        ));
    }

    #[test]
    fn error_object_fails_the_stream() {
        let payload = json!({"error": {"code": 400, "message": "API key not valid"}}).to_string();
        match parse_event(&payload) {
            Err(PortError::ExternalCall(message)) => assert_eq!(message, "API key not valid"),
            other => panic!("expected ExternalCall, got {:?}", other),
        }
    }

    #[test]
    fn api_errors_carry_status_and_message() {
        let err = map_api_error(429, r#"{"error": {"message": "Quota exceeded"}}"#);
        assert_eq!(
            err.to_string(),
            "External model call failed: Gemini API error (429): Quota exceeded"
        );
        let err = map_api_error(502, "Bad Gateway");
        assert!(err.to_string().contains("Bad Gateway"));
    }

    #[test]
    fn url_and_debug_output() {
        let adapter = GeminiAdapter::new("https://example.test/v1beta/", None).unwrap();
        assert_eq!(
            adapter.stream_url("gemini-2.0-flash"),
            "https://example.test/v1beta/models/gemini-2.0-flash:streamGenerateContent"
        );
        assert!(format!("{:?}", adapter).contains("example.test"));
    }

    #[tokio::test]
    async fn empty_key_is_a_missing_credential() {
        let adapter = GeminiAdapter::new("http://127.0.0.1:9", None).unwrap();
        let request = GenerationRequest {
            model: "m".to_string(),
            temperature: 0.3,
            api_key: " ".to_string(),
            contents: vec![ModelTurn::user_text("hi")],
        };
        assert!(matches!(
            adapter.stream_generate(request).await,
            Err(PortError::MissingCredential)
        ));
    }
}
