//! Bidirectional live conversation session.
//!
//! [`StreamingSession`] is an explicit state machine over the live-transport
//! seam: it opens the connection with a fixed configuration, forwards
//! encoded capture frames as they tick in, decodes inbound audio into the
//! playback scheduler, maps the remote interruption signal to an immediate
//! flush, and surfaces lifecycle events. Exactly one session is live at a
//! time; starting over an open session tears the old one down first.

pub mod transport;
pub mod ws;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::capture::{CaptureError, CaptureSource};
use super::codec::{self, OUTPUT_SAMPLE_RATE};
use super::playback::PlaybackScheduler;

pub use self::transport::{
    LiveConnection, LiveSender, LiveTransport, ResponseModality, ServerEvent, SessionConfig,
    TransportError, TransportResult,
};
pub use self::ws::WsLiveTransport;

/// Lifecycle states of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    /// Response audio is currently scheduled or playing.
    Streaming,
    /// The remote side flushed playback; the session stays open.
    Interrupted,
    Closing,
    Closed,
    Errored,
}

/// Lifecycle notifications delivered to the registered callback.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Opened,
    SpeakingStarted,
    SpeakingStopped,
    Interrupted,
    Closed,
    Errored(TransportError),
}

/// Callback type for session lifecycle events.
pub type SessionEventCallback = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Errors from starting a live session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Counters for one session's lifetime. All relaxed: diagnostics only.
#[derive(Debug, Default)]
pub struct SessionStats {
    frames_sent: AtomicU64,
    send_failures: AtomicU64,
    chunks_received: AtomicU64,
    chunks_dropped: AtomicU64,
    interruptions: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatsSnapshot {
    pub frames_sent: u64,
    pub send_failures: u64,
    pub chunks_received: u64,
    pub chunks_dropped: u64,
    pub interruptions: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl SessionStats {
    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// Everything the run task needs; shared with the owning session.
struct SessionShared {
    state: watch::Sender<SessionState>,
    callback: RwLock<Option<SessionEventCallback>>,
    stats: SessionStats,
    scheduler: Arc<PlaybackScheduler>,
}

impl SessionShared {
    fn emit(&self, event: SessionEvent) {
        if let Some(callback) = self.callback.read().as_ref() {
            callback(event);
        }
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }
}

/// Resources of the currently running session, guarded by an async mutex so
/// start/stop/toggle are serialized.
#[derive(Default)]
struct RunSlot {
    task: Option<tokio::task::JoinHandle<()>>,
    sender: Option<Arc<dyn LiveSender>>,
    shutdown: Option<watch::Sender<bool>>,
}

/// One logical bidirectional audio conversation, bounded by explicit
/// open/close.
pub struct StreamingSession {
    transport: Arc<dyn LiveTransport>,
    capture: Arc<CaptureSource>,
    config: SessionConfig,
    shared: Arc<SessionShared>,
    run: tokio::sync::Mutex<RunSlot>,
}

impl StreamingSession {
    pub fn new(
        transport: Arc<dyn LiveTransport>,
        capture: Arc<CaptureSource>,
        scheduler: Arc<PlaybackScheduler>,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            transport,
            capture,
            config,
            shared: Arc::new(SessionShared {
                state,
                callback: RwLock::new(None),
                stats: SessionStats::default(),
                scheduler,
            }),
            run: tokio::sync::Mutex::new(RunSlot::default()),
        }
    }

    /// Register the lifecycle event callback, replacing any previous one.
    pub fn on_event(&self, callback: SessionEventCallback) {
        *self.shared.callback.write() = Some(callback);
    }

    pub fn state(&self) -> SessionState {
        self.shared.current_state()
    }

    /// Subscribe to state transitions.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Whether response audio is currently scheduled or playing.
    pub fn is_speaking(&self) -> bool {
        self.shared.scheduler.is_speaking()
    }

    pub fn stats(&self) -> SessionStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Open the session: capture stream first, then the live connection.
    ///
    /// Calling `start` while a session is live is a toggle: the existing
    /// session is fully torn down before the new one opens, so two
    /// concurrent connections never exist.
    pub async fn start(&self) -> SessionResult<()> {
        let mut run = self.run.lock().await;

        if run.task.is_some() || !matches!(
            self.shared.current_state(),
            SessionState::Idle | SessionState::Closed | SessionState::Errored
        ) {
            info!("live session already active, toggling");
            Self::teardown(&self.shared, &mut run).await;
        }

        let session_id = Uuid::new_v4();
        self.shared.set_state(SessionState::Connecting);

        // The capture source may already be running for ambient analysis;
        // start() is a no-op in that case.
        let capture_handle = match self.capture.start(None) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(session_id = %session_id, "capture unavailable: {e}");
                self.shared.set_state(SessionState::Idle);
                return Err(e.into());
            }
        };

        let connection = match self.transport.open(&self.config).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(session_id = %session_id, "live session open failed: {e}");
                self.shared.set_state(SessionState::Errored);
                self.shared.emit(SessionEvent::Errored(e.clone()));
                return Err(e.into());
            }
        };

        info!(session_id = %session_id, voice = %self.config.voice, "live session open");
        self.shared.set_state(SessionState::Open);
        self.shared.emit(SessionEvent::Opened);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sender = Arc::clone(&connection.sender);
        let frames = capture_handle.subscribe();

        let task = tokio::spawn(run_loop(
            Arc::clone(&self.shared),
            Arc::clone(&sender),
            connection.events,
            frames,
            shutdown_rx,
        ));

        run.task = Some(task);
        run.sender = Some(sender);
        run.shutdown = Some(shutdown_tx);

        Ok(())
    }

    /// Close the session: stop forwarding frames, close the connection,
    /// clear all scheduled playback.
    ///
    /// Idempotent; safe from `Idle` and after errors. The capture source is
    /// deliberately left running so ambient analysis keeps working — only
    /// the composition root releases the microphone.
    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        Self::teardown(&self.shared, &mut run).await;
    }

    async fn teardown(shared: &Arc<SessionShared>, run: &mut RunSlot) {
        let was_live = !matches!(
            shared.current_state(),
            SessionState::Idle | SessionState::Closed | SessionState::Errored
        );

        if run.task.is_none() && !was_live {
            debug!("session stop requested while not running");
            return;
        }

        if was_live {
            shared.set_state(SessionState::Closing);
        }

        if let Some(shutdown) = run.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(sender) = run.sender.take() {
            let _ = sender.close().await;
        }
        if let Some(task) = run.task.take() {
            task.abort();
            let _ = task.await;
        }

        // Pending-but-not-started playback must not outlive the session.
        shared.scheduler.interrupt();

        if was_live {
            shared.set_state(SessionState::Closed);
            shared.emit(SessionEvent::Closed);
            info!("live session closed");
        }
    }
}

async fn run_loop(
    shared: Arc<SessionShared>,
    sender: Arc<dyn LiveSender>,
    mut events: mpsc::Receiver<ServerEvent>,
    mut frames: tokio::sync::broadcast::Receiver<codec::AudioFrame>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut speaking = shared.scheduler.speaking_changes();
    let mut was_speaking = *speaking.borrow();
    let mut capture_open = true;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,

            frame = frames.recv(), if capture_open => match frame {
                Ok(frame) => {
                    let chunk = codec::encode_frame(&frame);
                    let bytes = chunk.data.len() as u64;
                    // Fire-and-forget by policy: a failed frame is a live
                    // audio instant that has already passed, so it is
                    // dropped, not retried.
                    match sender.send_realtime_input(chunk).await {
                        Ok(()) => {
                            shared.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                            shared.stats.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
                        }
                        Err(e) => {
                            shared.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                            debug!("dropping capture frame: {e}");
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "session lagged behind the capture feed");
                }
                Err(RecvError::Closed) => {
                    debug!("capture feed closed, session continues receive-only");
                    capture_open = false;
                }
            },

            event = events.recv() => match event {
                Some(ServerEvent::Audio { data }) => {
                    match codec::decode_payload(&data, OUTPUT_SAMPLE_RATE) {
                        Ok(frame) => {
                            shared.stats.chunks_received.fetch_add(1, Ordering::Relaxed);
                            shared
                                .stats
                                .bytes_received
                                .fetch_add((frame.len() * 2) as u64, Ordering::Relaxed);
                            shared.scheduler.enqueue(frame);
                            shared.set_state(SessionState::Streaming);
                        }
                        Err(e) => {
                            // One malformed chunk is dropped; the session
                            // keeps streaming.
                            shared.stats.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                            warn!("dropping malformed audio chunk: {e}");
                        }
                    }
                }
                Some(ServerEvent::Interrupted) => {
                    shared.scheduler.interrupt();
                    shared.stats.interruptions.fetch_add(1, Ordering::Relaxed);
                    shared.set_state(SessionState::Interrupted);
                    shared.emit(SessionEvent::Interrupted);
                }
                Some(ServerEvent::Error(e)) => {
                    warn!("live session transport error: {e}");
                    shared.scheduler.interrupt();
                    shared.set_state(SessionState::Errored);
                    shared.emit(SessionEvent::Errored(e));
                    break;
                }
                Some(ServerEvent::Closed) | None => {
                    shared.scheduler.interrupt();
                    shared.set_state(SessionState::Closed);
                    shared.emit(SessionEvent::Closed);
                    break;
                }
            },

            changed = speaking.changed() => {
                if changed.is_err() {
                    break;
                }
                let now = *speaking.borrow_and_update();
                if now && !was_speaking {
                    shared.emit(SessionEvent::SpeakingStarted);
                } else if !now && was_speaking {
                    shared.emit(SessionEvent::SpeakingStopped);
                    // Natural drain returns Streaming to Open; an
                    // interruption keeps its own state until new audio.
                    if shared.current_state() == SessionState::Streaming {
                        shared.set_state(SessionState::Open);
                    }
                }
                was_speaking = now;
            }
        }
    }
}
