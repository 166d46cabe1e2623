//! Live-session collaborator contract.
//!
//! The bidirectional conversational endpoint is specified only by its
//! request/response shape: open a session with a fixed configuration, push
//! encoded capture frames, receive audio chunks and control events back.
//! [`LiveTransport`] and [`LiveSender`] are the seams the session state
//! machine is built against; the production WebSocket implementation lives
//! in [`super::ws`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::core::codec::EncodedChunk;

/// Errors crossing the live-session boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The session could not be opened.
    #[error("failed to open live session: {0}")]
    Open(String),

    /// An outbound frame could not be sent.
    #[error("live session send failed: {0}")]
    Send(String),

    /// The established connection failed.
    #[error("live session connection failed: {0}")]
    Connection(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Response modality requested from the remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseModality {
    Audio,
}

/// Fixed configuration a session is opened with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub response_modality: ResponseModality,
    /// Synthetic voice name used for the audio responses.
    pub voice: String,
    /// Persona text applied to the whole conversation.
    pub system_instruction: String,
}

impl SessionConfig {
    pub fn audio(voice: impl Into<String>, system_instruction: impl Into<String>) -> Self {
        Self {
            response_modality: ResponseModality::Audio,
            voice: voice.into(),
            system_instruction: system_instruction.into(),
        }
    }
}

/// Events delivered by the remote peer over an open session.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// One chunk of base64 PCM16 response audio (24 kHz mono). Zero or more
    /// of these arrive per conversational turn.
    Audio { data: String },
    /// The remote side detected the user talking over it; everything queued
    /// for playback must be flushed immediately.
    Interrupted,
    /// The connection failed.
    Error(TransportError),
    /// The remote side closed the session.
    Closed,
}

/// Outbound half of an open session.
#[async_trait]
pub trait LiveSender: Send + Sync {
    /// Push one encoded capture frame. Called once per capture tick while
    /// the session is open; callers treat failures as fire-and-forget.
    async fn send_realtime_input(&self, chunk: EncodedChunk) -> TransportResult<()>;

    /// Close the connection. Must be a no-op when already closed.
    async fn close(&self) -> TransportResult<()>;
}

/// An open session: the outbound sender plus the inbound event stream.
pub struct LiveConnection {
    pub sender: Arc<dyn LiveSender>,
    pub events: mpsc::Receiver<ServerEvent>,
}

/// Factory seam for opening live sessions.
#[async_trait]
pub trait LiveTransport: Send + Sync {
    async fn open(&self, config: &SessionConfig) -> TransportResult<LiveConnection>;
}
