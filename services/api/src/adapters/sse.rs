//! services/api/src/adapters/sse.rs
//!
//! Line buffering for Server-Sent Events. Network chunks do not line up with
//! event boundaries: one chunk may carry several `data:` lines, and one JSON
//! payload may be split across two chunks, even inside a multi-byte character.
//! Bytes are only decoded once a whole line has arrived.

use std::mem;
use tracing::warn;

#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes and returns the `data:` payloads of every line now complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            if let Some(data) = data_payload(&decode_line(&line)) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Called once the byte stream ends; parses a trailing line with no newline.
    pub fn flush(&mut self) -> Option<String> {
        let remaining = mem::take(&mut self.buffer);
        data_payload(&decode_line(&remaining))
    }
}

fn decode_line(line: &[u8]) -> String {
    match std::str::from_utf8(line) {
        Ok(text) => text.to_string(),
        Err(e) => {
            warn!("Invalid UTF-8 in event stream: {}", e);
            String::from_utf8_lossy(line).into_owned()
        }
    }
}

/// Non-data fields (`event:`, `id:`, comments) and blank separators yield nothing.
fn data_payload(line: &str) -> Option<String> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        None
    } else {
        Some(data.to_string())
    }
}
