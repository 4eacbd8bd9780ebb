// Jarvis Engine — Generative Provider Trait
// The seam between the engine and the external generative-language
// service. Sessions hold a provider; the fakes in the test suites stand
// in for the network.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use crate::credentials::Credential;
use crate::types::{ChatTurn, MessagePart};

// ── Errors ─────────────────────────────────────────────────────────────

/// Wire-level failure from a provider. Classified into the engine taxonomy
/// (initialization / send / annotation) at the call site that owns the
/// fallback.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("empty response from model")]
    EmptyResponse,
}

// ── Streaming ──────────────────────────────────────────────────────────

/// Incremental text fragments of one response, in arrival order.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

// ── Trait ──────────────────────────────────────────────────────────────

/// A conversational backend bound to one credential. The full history is
/// sent with every call — the service holds no state between requests.
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    /// Single-shot exchange: history + new parts → complete response text.
    async fn generate(
        &self,
        history: &[ChatTurn],
        parts: &[MessagePart],
    ) -> Result<String, ProviderError>;

    /// Streaming exchange. The returned stream yields text fragments as the
    /// transport delivers them; an `Err` item ends the stream.
    async fn generate_stream(
        &self,
        history: &[ChatTurn],
        parts: &[MessagePart],
    ) -> Result<ChunkStream, ProviderError>;
}

// ── Factory ────────────────────────────────────────────────────────────

/// Builds a provider for one credential. The failover walk creates each
/// candidate's provider from scratch; nothing is shared between credentials.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, credential: &Credential) -> Arc<dyn GenerativeProvider>;
}
