// Jarvis Engine — Transcript Store
// Ordered, size-bounded, persisted list of exchanged messages.
// Persistence is best-effort: a failed write is logged and swallowed,
// the in-memory list stays authoritative. A quota failure clears the
// storage scope once and retries the write exactly once.

use log::{error, warn};

use crate::error::{EngineError, EngineResult};
use crate::storage::{KeyValueStorage, StorageError};
use crate::types::Message;

/// Fixed key the transcript is persisted under.
pub const MESSAGES_STORAGE_KEY: &str = "jarvis_chat_messages";

/// Only the most recent messages are persisted; the in-memory list may
/// grow beyond this.
pub const PERSISTED_MESSAGE_LIMIT: usize = 50;

pub struct TranscriptStore {
    messages: Vec<Message>,
    storage: Box<dyn KeyValueStorage>,
}

impl TranscriptStore {
    /// Load the persisted transcript. Corrupt or unreadable stored data
    /// yields an empty transcript, never an error.
    pub fn load(storage: Box<dyn KeyValueStorage>) -> Self {
        let messages = match storage.get(MESSAGES_STORAGE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(messages) => messages,
                Err(e) => {
                    error!("[engine] Failed to parse stored transcript, starting empty: {e}");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                error!("[engine] Failed to read stored transcript, starting empty: {e}");
                Vec::new()
            }
        };
        TranscriptStore { messages, storage }
    }

    /// Append a message and persist. The persist attempt completes, success
    /// or swallowed failure, before this returns.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
        self.persist();
    }

    /// Write the most recent messages to durable storage.
    fn persist(&mut self) {
        if let Err(e) = self.try_persist() {
            error!("[engine] Transcript not persisted (continuing): {e}");
        }
    }

    fn try_persist(&mut self) -> EngineResult<()> {
        let start = self.messages.len().saturating_sub(PERSISTED_MESSAGE_LIMIT);
        let raw = serde_json::to_string(&self.messages[start..])
            .map_err(|e| StorageError::Backend(format!("serialize: {e}")))?;

        match self.storage.set(MESSAGES_STORAGE_KEY, &raw) {
            Ok(()) => Ok(()),
            Err(StorageError::QuotaExceeded) => {
                warn!("[engine] Storage quota exceeded, clearing store and retrying once");
                self.storage.clear().map_err(EngineError::Persistence)?;
                self.storage
                    .set(MESSAGES_STORAGE_KEY, &raw)
                    .map_err(EngineError::Persistence)
            }
            Err(e) => Err(EngineError::Persistence(e)),
        }
    }

    /// Empty the transcript and remove the persisted entry.
    pub fn clear(&mut self) {
        self.messages.clear();
        if let Err(e) = self.storage.remove(MESSAGES_STORAGE_KEY) {
            error!("[engine] Failed to clear persisted transcript: {e}");
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
