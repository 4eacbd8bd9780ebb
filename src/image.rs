// Jarvis Engine — Image Attachments
// Validates an uploaded image and holds its encoded forms: the base64
// payload for the wire and the data URI for transcript previews.
// Validation happens here, before any network call.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{EngineError, EngineResult};
use crate::types::MessagePart;

/// Upload size cap: 5 MB.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Image formats the model accepts.
pub const ACCEPTED_IMAGE_TYPES: [&str; 4] =
    ["image/jpeg", "image/png", "image/gif", "image/webp"];

/// A validated image attachment awaiting send.
#[derive(Debug)]
pub struct PendingImage {
    mime_type: String,
    encoded: String,
    preview: String,
    rendered_size: Option<(u32, u32)>,
}

impl PendingImage {
    pub fn new(bytes: &[u8], mime_type: &str) -> EngineResult<Self> {
        if !ACCEPTED_IMAGE_TYPES.contains(&mime_type) {
            return Err(EngineError::Validation(format!(
                "unsupported image type: {mime_type}"
            )));
        }
        if bytes.is_empty() {
            return Err(EngineError::Validation("image is empty".into()));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(EngineError::Validation(format!(
                "image is {} bytes, limit is {MAX_IMAGE_BYTES}",
                bytes.len()
            )));
        }
        let encoded = BASE64.encode(bytes);
        let preview = format!("data:{mime_type};base64,{encoded}");
        Ok(PendingImage {
            mime_type: mime_type.to_string(),
            encoded,
            preview,
            rendered_size: None,
        })
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Data URI for transcript previews.
    pub fn preview_data_uri(&self) -> &str {
        &self.preview
    }

    /// Displayed dimensions, once the frontend has laid the image out.
    /// Annotation needs these to scale normalized coordinates to pixels.
    pub fn set_rendered_size(&mut self, width: u32, height: u32) {
        self.rendered_size = Some((width, height));
    }

    pub fn rendered_size(&self) -> Option<(u32, u32)> {
        self.rendered_size
    }

    /// The wire form: base64 payload without the `data:` prefix.
    pub fn to_part(&self) -> MessagePart {
        MessagePart::InlineImage {
            mime_type: self.mime_type.clone(),
            data: self.encoded.clone(),
        }
    }
}
