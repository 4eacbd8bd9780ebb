// Jarvis Engine — Chat Engine
// Orchestrates one send end to end: transcript entry, streaming with
// single-shot fallback on the active session, then the failover walk over
// the remaining credentials. Exactly one assistant entry lands in the
// transcript per send, the fixed apology if everything failed.

use futures::StreamExt;
use log::{error, info, warn};

use crate::credentials::Credential;
use crate::error::{EngineError, EngineResult};
use crate::image::PendingImage;
use crate::provider::ProviderError;
use crate::session::{initialize_session, ChatSession, SessionManager};
use crate::transcript::TranscriptStore;
use crate::types::{Message, MessagePart, JARVIS_IDENTITY};

/// The only error text that ever reaches the transcript. Technical detail
/// stays in the log.
pub const APOLOGY_TEXT: &str = "I apologize, but I encountered an error. Please try again.";

/// Transcript stand-in for a send that carried an image and no text.
pub const IMAGE_ONLY_PLACEHOLDER: &str = "Image uploaded";

pub struct ChatEngine {
    sessions: SessionManager,
    transcript: TranscriptStore,
    busy: bool,
}

impl ChatEngine {
    pub fn new(sessions: SessionManager, transcript: TranscriptStore) -> Self {
        ChatEngine { sessions, transcript, busy: false }
    }

    /// Establish the initial session. Call once before sending.
    pub async fn start(&mut self) -> EngineResult<()> {
        self.sessions.establish_active_session().await
    }

    pub fn transcript(&self) -> &[Message] {
        self.transcript.messages()
    }

    pub fn clear_transcript(&mut self) {
        self.transcript.clear();
    }

    pub fn has_active_session(&self) -> bool {
        self.sessions.active().is_some()
    }

    /// Send one message. `on_chunk` receives the accumulated response text as
    /// fragments arrive; the final transcript entry is appended before this
    /// returns. Failover failures end in the apology entry, not an `Err` —
    /// errors here mean the send never reached a provider.
    pub async fn send_message(
        &mut self,
        text: &str,
        image: Option<&PendingImage>,
        mut on_chunk: impl FnMut(&str),
    ) -> EngineResult<()> {
        if self.busy {
            return Err(EngineError::Busy);
        }
        let trimmed = text.trim();
        if trimmed.is_empty() && image.is_none() {
            return Err(EngineError::Validation("message is empty".into()));
        }
        if self.sessions.active().is_none() {
            return Err(EngineError::Send("no active session".into()));
        }

        self.busy = true;
        let result = self.send_inner(trimmed, image, &mut on_chunk).await;
        self.busy = false;
        result
    }

    async fn send_inner(
        &mut self,
        trimmed: &str,
        image: Option<&PendingImage>,
        on_chunk: &mut dyn FnMut(&str),
    ) -> EngineResult<()> {
        let display = if trimmed.is_empty() { IMAGE_ONLY_PLACEHOLDER } else { trimmed };
        let preview = image.map(|i| i.preview_data_uri().to_string());
        self.transcript.append(Message::user(display, preview));

        // Image first, then text when there is any. An image-only send
        // carries the image part alone; the identity reminder rides on
        // every text part.
        let mut parts = Vec::new();
        if let Some(image) = image {
            parts.push(image.to_part());
        }
        if !trimmed.is_empty() {
            parts.push(MessagePart::Text(format!(
                "{trimmed}\n\nRemember: {JARVIS_IDENTITY}"
            )));
        }

        let session = self
            .sessions
            .active()
            .ok_or_else(|| EngineError::Send("no active session".into()))?;
        match Self::stream_response(session, &parts, on_chunk).await {
            Ok(reply) => {
                if let Some(session) = self.sessions.active_mut() {
                    session.record_exchange(parts, &reply);
                }
                self.transcript.append(Message::assistant(reply));
                Ok(())
            }
            Err(e) => {
                warn!("[engine] Active session failed to respond: {e}");
                self.retry_with_remaining(parts).await
            }
        }
    }

    /// Stream the response, accumulating fragments. Any streaming failure
    /// (opening or mid-stream) discards the partial text and falls back to
    /// one single-shot request on the same session.
    async fn stream_response(
        session: &ChatSession,
        parts: &[MessagePart],
        on_chunk: &mut dyn FnMut(&str),
    ) -> EngineResult<String> {
        match Self::try_stream(session, parts, on_chunk).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                warn!("[engine] Streaming failed, falling back to single-shot: {e}");
                let reply = session
                    .send_once(parts)
                    .await
                    .map_err(|e| EngineError::Send(e.to_string()))?;
                on_chunk(&reply);
                Ok(reply)
            }
        }
    }

    async fn try_stream(
        session: &ChatSession,
        parts: &[MessagePart],
        on_chunk: &mut dyn FnMut(&str),
    ) -> Result<String, ProviderError> {
        let mut stream = session.open_stream(parts).await?;
        let mut accumulated = String::new();
        while let Some(item) = stream.next().await {
            accumulated.push_str(&item?);
            on_chunk(&accumulated);
        }
        // A stream that ends cleanly with nothing accumulated finalizes as
        // an empty reply; only stream errors trigger the fallback.
        Ok(accumulated)
    }

    /// Walk the credentials after the active one, in pool order. Each
    /// candidate gets one initialization and one single-shot send; the first
    /// success becomes the active session. Exhaustion appends the apology
    /// and leaves the active session unchanged.
    async fn retry_with_remaining(&mut self, parts: Vec<MessagePart>) -> EngineResult<()> {
        let last = self.sessions.active().map(|s| s.credential().clone());
        let candidates: Vec<Credential> = match &last {
            Some(c) => self.sessions.pool().after(c).to_vec(),
            None => self.sessions.pool().iter().cloned().collect(),
        };

        for credential in &candidates {
            info!(
                "[engine] Failing over to key ending in ...{}",
                credential.last4()
            );
            let mut session =
                match initialize_session(self.sessions.factory(), credential).await {
                    Ok(session) => session,
                    Err(_) => continue,
                };
            match session.send_once(&parts).await {
                Ok(reply) => {
                    info!(
                        "[engine] Failover succeeded with key ending in ...{}",
                        credential.last4()
                    );
                    session.record_exchange(parts, &reply);
                    self.sessions.install(session);
                    self.transcript.append(Message::assistant(reply));
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "[engine] Retry with key ending in ...{} failed: {e}",
                        credential.last4()
                    );
                }
            }
        }

        error!("[engine] All credentials exhausted, appending apology");
        self.transcript.append(Message::assistant(APOLOGY_TEXT));
        Ok(())
    }

    /// Access for the annotation pipeline, which talks to the active session
    /// directly without touching the transcript.
    pub fn active_session(&self) -> Option<&ChatSession> {
        self.sessions.active()
    }
}
