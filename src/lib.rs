// Jarvis Engine
// A Gemini-backed chat engine with credential failover, streaming with
// single-shot fallback, a persisted transcript, and image annotation.

pub mod annotate;
pub mod chat;
pub mod credentials;
pub mod error;
pub mod gemini;
pub mod image;
pub mod provider;
pub mod session;
pub mod storage;
pub mod transcript;
pub mod types;

pub use chat::{ChatEngine, APOLOGY_TEXT};
pub use error::{EngineError, EngineResult};
