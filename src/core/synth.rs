//! One-shot voice synthesis collaborator.
//!
//! The synthesis endpoint takes `{ text, voice }` and returns a single
//! base64 PCM16 payload at 24 kHz mono, or a failure. [`SpeechSynthesizer`]
//! is the seam the clip cache is built against; [`HttpSynthesizer`] is the
//! production HTTP implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Errors from a synthesis request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SynthesisError {
    /// The request never completed.
    #[error("synthesis request failed: {0}")]
    Request(String),

    /// The endpoint answered with a non-success status.
    #[error("synthesis endpoint returned status {0}")]
    Status(u16),

    /// The response body was not the expected shape.
    #[error("malformed synthesis response: {0}")]
    Payload(String),
}

/// Result type for synthesis operations.
pub type SynthesisResult<T> = Result<T, SynthesisError>;

/// One-shot text-to-speech collaborator.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with the given voice; returns base64 PCM16
    /// (24 kHz mono) on success.
    async fn synthesize(&self, text: &str, voice: &str) -> SynthesisResult<String>;
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesisResponse {
    audio_content: String,
}

/// HTTP implementation of the synthesis collaborator.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSynthesizer {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> SynthesisResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SynthesisError::Request(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> SynthesisResult<String> {
        debug!(chars = text.len(), voice, "requesting synthesis");

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&SynthesisRequest { text, voice });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SynthesisError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SynthesisError::Status(status.as_u16()));
        }

        let body: SynthesisResponse = response
            .json()
            .await
            .map_err(|e| SynthesisError::Payload(e.to_string()))?;

        if body.audio_content.is_empty() {
            return Err(SynthesisError::Payload("empty audio content".into()));
        }

        Ok(body.audio_content)
    }
}
