// Jarvis Engine — Gemini Provider
// Talks to the generative-language REST API: single-shot `generateContent`
// and SSE `streamGenerateContent`. One provider instance per credential.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use log::error;
use reqwest::Client;
use serde_json::{json, Value};

use crate::credentials::Credential;
use crate::provider::{ChunkStream, GenerativeProvider, ProviderError, ProviderFactory};
use crate::types::{ChatTurn, GenerationParams, MessagePart, TurnRole};

/// Default API endpoint.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// ── Provider ───────────────────────────────────────────────────────────

pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    params: GenerationParams,
}

impl GeminiProvider {
    pub fn new(credential: &Credential, model: &str, params: GenerationParams) -> Self {
        Self::with_base_url(credential, model, params, GEMINI_BASE_URL)
    }

    pub fn with_base_url(
        credential: &Credential,
        model: &str,
        params: GenerationParams,
        base_url: &str,
    ) -> Self {
        GeminiProvider {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: credential.secret().to_string(),
            model: model.to_string(),
            params,
        }
    }

    fn endpoint(&self, method: &str, query: &str) -> String {
        format!(
            "{}/models/{}:{method}?{query}key={}",
            self.base_url, self.model, self.api_key
        )
    }

    fn request_body(&self, history: &[ChatTurn], parts: &[MessagePart]) -> Value {
        let mut contents: Vec<Value> = history.iter().map(turn_to_json).collect();
        contents.push(json!({
            "role": "user",
            "parts": parts.iter().map(part_to_json).collect::<Vec<_>>(),
        }));
        json!({
            "contents": contents,
            "generationConfig": {
                "temperature": self.params.temperature,
                "topK": self.params.top_k,
                "topP": self.params.top_p,
                "maxOutputTokens": self.params.max_output_tokens,
            }
        })
    }

    async fn post(&self, url: &str, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body_text = response.text().await.unwrap_or_default();
            error!("[engine] Gemini error {}: {}", status, clip(&body_text, 500));
            return Err(ProviderError::Api {
                status,
                message: clip(&body_text, 200).to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerativeProvider for GeminiProvider {
    async fn generate(
        &self,
        history: &[ChatTurn],
        parts: &[MessagePart],
    ) -> Result<String, ProviderError> {
        let url = self.endpoint("generateContent", "");
        let body = self.request_body(history, parts);
        let response = self.post(&url, &body).await?;
        let v: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(format!("invalid response body: {e}")))?;
        frame_text(&v).ok_or(ProviderError::EmptyResponse)
    }

    async fn generate_stream(
        &self,
        history: &[ChatTurn],
        parts: &[MessagePart],
    ) -> Result<ChunkStream, ProviderError> {
        let url = self.endpoint("streamGenerateContent", "alt=sse&");
        let body = self.request_body(history, parts);
        let response = self.post(&url, &body).await?;
        Ok(sse_text_stream(Box::pin(response.bytes_stream())))
    }
}

// ── Wire helpers ───────────────────────────────────────────────────────

fn turn_to_json(turn: &ChatTurn) -> Value {
    let role = match turn.role {
        TurnRole::User => "user",
        TurnRole::Model => "model",
    };
    json!({
        "role": role,
        "parts": turn.parts.iter().map(part_to_json).collect::<Vec<_>>(),
    })
}

fn part_to_json(part: &MessagePart) -> Value {
    match part {
        MessagePart::Text(text) => json!({ "text": text }),
        MessagePart::InlineImage { mime_type, data } => json!({
            "inline_data": { "mime_type": mime_type, "data": data }
        }),
    }
}

/// Concatenated text of every candidate part in one response frame.
fn frame_text(v: &Value) -> Option<String> {
    let candidates = v["candidates"].as_array()?;
    let mut out = String::new();
    for candidate in candidates {
        if let Some(parts) = candidate["content"]["parts"].as_array() {
            for part in parts {
                if let Some(text) = part["text"].as_str() {
                    out.push_str(text);
                }
            }
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Clip to at most `max` bytes without splitting a UTF-8 character.
fn clip(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ── SSE decoding ───────────────────────────────────────────────────────

struct SseState<S> {
    source: S,
    buffer: String,
    pending: VecDeque<String>,
    done: bool,
}

/// Decode an SSE byte stream into text fragments, in arrival order.
/// Lines are `data: {json frame}`; anything else is ignored. A transport
/// error is surfaced as the stream's final item.
fn sse_text_stream<S, B, E>(source: S) -> ChunkStream
where
    S: futures::Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let state = SseState {
        source,
        buffer: String::new(),
        pending: VecDeque::new(),
        done: false,
    };
    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(text) = st.pending.pop_front() {
                return Some((Ok(text), st));
            }
            if st.done {
                return None;
            }
            match st.source.next().await {
                Some(Ok(chunk)) => {
                    st.buffer.push_str(&String::from_utf8_lossy(chunk.as_ref()));
                    while let Some(pos) = st.buffer.find('\n') {
                        let line: String = st.buffer.drain(..=pos).collect();
                        if let Some(data) = line.trim().strip_prefix("data: ") {
                            if let Ok(v) = serde_json::from_str::<Value>(data) {
                                if let Some(text) = frame_text(&v) {
                                    st.pending.push_back(text);
                                }
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((
                        Err(ProviderError::Transport(format!("stream read error: {e}"))),
                        st,
                    ));
                }
                None => st.done = true,
            }
        }
    }))
}

// ── Factory ────────────────────────────────────────────────────────────

/// Builds one `GeminiProvider` per credential, all with the same model and
/// generation parameters.
pub struct GeminiFactory {
    model: String,
    params: GenerationParams,
}

impl GeminiFactory {
    pub fn new(model: impl Into<String>, params: GenerationParams) -> Self {
        GeminiFactory { model: model.into(), params }
    }
}

impl ProviderFactory for GeminiFactory {
    fn create(&self, credential: &Credential) -> Arc<dyn GenerativeProvider> {
        Arc::new(GeminiProvider::new(credential, &self.model, self.params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> GeminiProvider {
        GeminiProvider::new(
            &Credential::new("test-key-0000"),
            "gemini-1.5-pro",
            GenerationParams::default(),
        )
    }

    #[test]
    fn request_body_carries_history_and_generation_config() {
        let history = crate::types::seeded_history();
        let parts = vec![MessagePart::Text("what time is it?".into())];
        let body = provider().request_body(&history, &parts);

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3); // greeting exchange + new turn
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(contents[2]["parts"][0]["text"], "what time is it?");

        let config = &body["generationConfig"];
        assert_eq!(config["temperature"], 0.7);
        assert_eq!(config["topK"], 40);
        assert_eq!(config["topP"], 0.95);
        assert_eq!(config["maxOutputTokens"], 2048);
    }

    #[test]
    fn image_part_serializes_as_inline_data() {
        let part = MessagePart::InlineImage {
            mime_type: "image/png".into(),
            data: "aGVsbG8=".into(),
        };
        let v = part_to_json(&part);
        assert_eq!(v["inline_data"]["mime_type"], "image/png");
        assert_eq!(v["inline_data"]["data"], "aGVsbG8=");
    }

    #[test]
    fn endpoint_formats() {
        let p = provider();
        assert_eq!(
            p.endpoint("generateContent", ""),
            format!("{GEMINI_BASE_URL}/models/gemini-1.5-pro:generateContent?key=test-key-0000")
        );
        assert!(p
            .endpoint("streamGenerateContent", "alt=sse&")
            .contains(":streamGenerateContent?alt=sse&key="));
    }

    #[test]
    fn frame_text_concatenates_candidate_parts() {
        let v: Value = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hel"},{"text":"lo"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(frame_text(&v).as_deref(), Some("Hello"));

        let empty: Value = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(frame_text(&empty).is_none());
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("hello", 10), "hello");
        assert_eq!(clip("hello", 3), "hel");
        // "é" is two bytes; clipping at 1 must not split it.
        assert_eq!(clip("é", 1), "");
    }

    fn sse_bytes(chunks: Vec<Result<&'static str, String>>) -> ChunkStream {
        sse_text_stream(futures::stream::iter(
            chunks.into_iter().map(|r| r.map(|s| s.as_bytes().to_vec())),
        ))
    }

    #[tokio::test]
    async fn sse_stream_decodes_frames_in_order() {
        let stream = sse_bytes(vec![
            Ok("data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"ab\"}]}}]}\n"),
            Ok("data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"c\"}]}}]}\n\n"),
        ]);
        let chunks: Vec<_> = stream.collect().await;
        let texts: Vec<String> = chunks.into_iter().map(|c| c.unwrap()).collect();
        assert_eq!(texts, vec!["ab", "c"]);
    }

    #[tokio::test]
    async fn sse_stream_handles_frames_split_across_reads() {
        let stream = sse_bytes(vec![
            Ok("data: {\"candidates\":[{\"content\":{\"parts\":"),
            Ok("[{\"text\":\"joined\"}]}}]}\n"),
        ]);
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap(), "joined");
    }

    #[tokio::test]
    async fn sse_stream_surfaces_transport_error_and_ends() {
        let stream = sse_bytes(vec![
            Ok("data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"partial\"}]}}]}\n"),
            Err("connection reset".to_string()),
        ]);
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref().unwrap(), "partial");
        assert!(matches!(chunks[1], Err(ProviderError::Transport(_))));
    }

    #[tokio::test]
    async fn sse_stream_ignores_non_data_lines() {
        let stream = sse_bytes(vec![Ok(": keepalive\n\nnot-sse\ndata: {broken\n")]);
        let chunks: Vec<_> = stream.collect().await;
        assert!(chunks.is_empty());
    }
}
