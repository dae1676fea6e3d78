//! crates/diet_assistant_core/src/normalizer.rs
//!
//! Reshapes the in-memory conversation into the turn sequence the external
//! model accepts. The model mishandles back-to-back turns with the same role,
//! so consecutive same-role turns are merged into one.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::domain::{DecodedImage, ModelPart, ModelRole, ModelTurn, Part, Role, Turn};
use crate::ports::{PortError, PortResult};

/// Converts turns into model turns in a single left-to-right pass.
///
/// A turn whose role equals the role of the turn right before it is appended
/// onto the last emitted model turn. Image parts are decoded from their data
/// URI; a malformed payload fails the whole call with `UnsupportedContent`.
pub fn normalize_turns(turns: &[Turn]) -> PortResult<Vec<ModelTurn>> {
    let mut model_turns: Vec<ModelTurn> = Vec::with_capacity(turns.len());
    let mut previous_role: Option<Role> = None;

    for turn in turns {
        let parts = turn
            .parts
            .iter()
            .map(to_model_part)
            .collect::<PortResult<Vec<_>>>()?;

        match model_turns.last_mut() {
            Some(last) if previous_role == Some(turn.role) => last.parts.extend(parts),
            _ => model_turns.push(ModelTurn {
                role: ModelRole::from(turn.role),
                parts,
            }),
        }
        previous_role = Some(turn.role);
    }

    Ok(model_turns)
}

fn to_model_part(part: &Part) -> PortResult<ModelPart> {
    match part {
        Part::Text { text } => Ok(ModelPart::Text(text.clone())),
        Part::ImageUrl { image_url } => decode_data_uri(&image_url.url).map(ModelPart::Image),
    }
}

/// Decodes a `data:<mime>;base64,<payload>` URI into image bytes.
///
/// Everything up to the first comma is discarded; the MIME type is sniffed
/// from the decoded bytes rather than trusted from the header.
pub fn decode_data_uri(data_uri: &str) -> PortResult<DecodedImage> {
    let (_, payload) = data_uri.split_once(',').ok_or_else(|| {
        PortError::UnsupportedContent("image payload is not a data URI".to_string())
    })?;

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| PortError::UnsupportedContent(format!("invalid base64 image: {}", e)))?;

    let format = image::guess_format(&bytes)
        .map_err(|e| PortError::UnsupportedContent(format!("unrecognized image: {}", e)))?;

    Ok(DecodedImage {
        mime_type: format.to_mime_type().to_string(),
        bytes,
    })
}
