// Jarvis Engine — Core types
// These are the data structures that flow through the entire engine.
// They are independent of any specific wire format.

use serde::{Deserialize, Serialize};

// ── Constants ──────────────────────────────────────────────────────────

/// Model every session talks to.
pub const DEFAULT_MODEL: &str = "gemini-1.5-pro";

/// The fixed identity preamble seeded into every session and appended as a
/// reminder to every outgoing text part.
pub const JARVIS_IDENTITY: &str = "\
I am Jarvis, an advanced AI assistant created and developed by PW Security under the guidance of The Professor. \
My primary purpose is to assist users with their queries while maintaining the highest standards of security and professionalism. \
I have been specifically designed to handle complex tasks, provide detailed analysis, and ensure user safety at all times.";

// ── Messages (transcript) ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// One entry in the conversation transcript. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub sender: Sender,
    pub text: String,
    /// Data URI of the attached image, if the user sent one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// RFC 3339, recorded when the message was created. Absent in transcripts
    /// persisted by older builds, hence the default.
    #[serde(default)]
    pub timestamp: String,
}

impl Message {
    pub fn user(text: impl Into<String>, image: Option<String>) -> Self {
        Message {
            sender: Sender::User,
            text: text.into(),
            image,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Message {
            sender: Sender::Assistant,
            text: text.into(),
            image: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

// ── Outgoing message parts ─────────────────────────────────────────────

/// One part of an outgoing message. A send carries an ordered sequence of
/// these — image first, then text, when both are present.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagePart {
    Text(String),
    /// Inline image bytes, base64-encoded without the `data:` prefix.
    InlineImage { mime_type: String, data: String },
}

// ── Conversation history (session context) ─────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Model,
}

/// One turn of the conversation context a session carries. Sent in full with
/// every request — the external service holds no state between calls.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub parts: Vec<MessagePart>,
}

impl ChatTurn {
    pub fn user(parts: Vec<MessagePart>) -> Self {
        ChatTurn { role: TurnRole::User, parts }
    }

    pub fn model(text: impl Into<String>) -> Self {
        ChatTurn {
            role: TurnRole::Model,
            parts: vec![MessagePart::Text(text.into())],
        }
    }
}

/// The seeded greeting exchange that primes the Jarvis identity. Every new
/// session starts from exactly this history; nothing carries across
/// credentials on failover.
pub fn seeded_history() -> Vec<ChatTurn> {
    vec![
        ChatTurn::user(vec![MessagePart::Text("Hello".into())]),
        ChatTurn::model(format!(
            "Greetings! {JARVIS_IDENTITY} How may I assist you today?"
        )),
    ]
}

// ── Generation parameters ──────────────────────────────────────────────

/// Fixed generation parameters applied to every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        GenerationParams {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 2048,
        }
    }
}

// ── Bounding boxes ─────────────────────────────────────────────────────

/// A detected object rectangle in pixel space, derived from the model's
/// normalized `[ymin, xmin, ymax, xmax]` output scaled by the rendered
/// image dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub label: String,
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}
