//! WebSocket implementation of the live-session transport.
//!
//! Wire shape: the client opens the socket, sends one JSON setup message
//! carrying the session configuration, then streams realtime-input messages
//! (base64 PCM16 @16 kHz). The server replies with zero or more inline
//! audio messages per turn (base64 PCM16 @24 kHz) and may send an
//! `interrupted` marker instead, which maps to a playback flush upstream.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use super::transport::{
    LiveConnection, LiveSender, LiveTransport, ServerEvent, SessionConfig, TransportError,
    TransportResult,
};
use crate::core::codec::EncodedChunk;

/// Bound on in-flight outbound frames; one entry per capture tick.
const OUTBOUND_CHANNEL_CAPACITY: usize = 32;

/// Bound on undelivered inbound events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupMessage<'a> {
    setup: &'a SessionConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage<'a> {
    realtime_input: RealtimeInput<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput<'a> {
    data: &'a str,
    mime_type: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundMessage {
    #[serde(default)]
    inline_audio_data: Option<String>,
    #[serde(default)]
    interrupted: Option<bool>,
}

enum OutboundCommand {
    Payload(String),
    Close,
}

/// WebSocket-backed [`LiveTransport`].
pub struct WsLiveTransport {
    url: String,
}

impl WsLiveTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl LiveTransport for WsLiveTransport {
    async fn open(&self, config: &SessionConfig) -> TransportResult<LiveConnection> {
        let (socket, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Open(format!("websocket connect failed: {e}")))?;

        info!(url = %self.url, "live session socket connected");

        let (mut sink, mut stream) = socket.split();

        // The setup message is part of opening: a session that cannot be
        // configured is reported as a failed open, not a dead connection.
        let setup = serde_json::to_string(&SetupMessage { setup: config })
            .map_err(|e| TransportError::Open(format!("failed to serialize setup: {e}")))?;
        sink.send(Message::Text(setup.into()))
            .await
            .map_err(|e| TransportError::Open(format!("failed to send setup: {e}")))?;

        let (out_tx, mut out_rx) = mpsc::channel::<OutboundCommand>(OUTBOUND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(EVENT_CHANNEL_CAPACITY);

        // Writer task: owns the sink half until close.
        tokio::spawn(async move {
            while let Some(command) = out_rx.recv().await {
                match command {
                    OutboundCommand::Payload(json) => {
                        if let Err(e) = sink.send(Message::Text(json.into())).await {
                            debug!("outbound send failed, writer exiting: {e}");
                            break;
                        }
                    }
                    OutboundCommand::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        // Reader task: translates wire messages into server events.
        tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<InboundMessage>(&text) {
                            Ok(message) => {
                                if let Some(event) = translate(message) {
                                    if event_tx.send(event).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                // A malformed message costs one chunk, never
                                // the session.
                                warn!("dropping malformed server message: {e}");
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("live session closed by server: {frame:?}");
                        let _ = event_tx.send(ServerEvent::Closed).await;
                        break;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(_)) => {
                        debug!("ignoring non-text server message");
                    }
                    Some(Err(e)) => {
                        let error = TransportError::Connection(e.to_string());
                        let _ = event_tx.send(ServerEvent::Error(error)).await;
                        break;
                    }
                    None => {
                        let _ = event_tx.send(ServerEvent::Closed).await;
                        break;
                    }
                }
            }
        });

        Ok(LiveConnection {
            sender: Arc::new(WsSender { out_tx }),
            events: event_rx,
        })
    }
}

fn translate(message: InboundMessage) -> Option<ServerEvent> {
    if message.interrupted == Some(true) {
        return Some(ServerEvent::Interrupted);
    }
    if let Some(data) = message.inline_audio_data {
        return Some(ServerEvent::Audio { data });
    }
    debug!("server message carried neither audio nor an interruption");
    None
}

struct WsSender {
    out_tx: mpsc::Sender<OutboundCommand>,
}

#[async_trait]
impl LiveSender for WsSender {
    async fn send_realtime_input(&self, chunk: EncodedChunk) -> TransportResult<()> {
        let message = RealtimeInputMessage {
            realtime_input: RealtimeInput {
                data: &chunk.data,
                mime_type: &chunk.mime_type,
            },
        };
        let json = serde_json::to_string(&message)
            .map_err(|e| TransportError::Send(format!("failed to serialize frame: {e}")))?;

        self.out_tx
            .send(OutboundCommand::Payload(json))
            .await
            .map_err(|_| TransportError::Send("connection writer is gone".into()))
    }

    async fn close(&self) -> TransportResult<()> {
        // Already-closed writer means the close is a no-op.
        let _ = self.out_tx.send(OutboundCommand::Close).await;
        Ok(())
    }
}
