//! Composition root of the audio pipeline.
//!
//! [`Engine`] owns every pipeline component and wires them per use case:
//! ambient analysis (capture + analyzer), live conversation (adds the
//! streaming session and the playback scheduler), and cached clip playback
//! (clip cache + its own sink, independent of the other two). The engine is
//! the only place allowed to release the microphone, after both consumers
//! are done with it.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::core::analyzer::{AnalyzerConfig, AnalyzerHandle, SpectralAnalyzer};
use crate::core::capture::{CaptureBackend, CaptureSource};
use crate::core::clips::ClipCache;
use crate::core::device::{DeviceCaptureBackend, DeviceSink};
use crate::core::playback::{AudioClock, PlaybackScheduler, PlaybackSink};
use crate::core::session::{
    LiveTransport, SessionConfig, SessionEventCallback, SessionState, SessionStatsSnapshot,
    StreamingSession, WsLiveTransport,
};
use crate::core::synth::{HttpSynthesizer, SpeechSynthesizer};
use crate::core::{AnalysisSnapshot, session};
use crate::errors::EngineResult;

/// The engine's collaborator and device seams, injected at construction.
///
/// Production code uses [`Engine::with_devices`]; tests and embedders swap
/// in their own implementations.
pub struct EngineParts {
    pub capture_backend: Box<dyn CaptureBackend>,
    pub transport: Arc<dyn LiveTransport>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Sink for live-session response audio.
    pub voice_sink: Arc<dyn PlaybackSink>,
    /// Separate sink for cached clips, so clip playback can never corrupt
    /// the live scheduler's bookkeeping.
    pub clip_sink: Arc<dyn PlaybackSink>,
}

/// Composition root over capture, analysis, live session and clips.
pub struct Engine {
    config: EngineConfig,
    capture: Arc<CaptureSource>,
    analyzer: Arc<SpectralAnalyzer>,
    scheduler: Arc<PlaybackScheduler>,
    session: StreamingSession,
    clips: ClipCache,
    attachment: Mutex<Option<AnalyzerHandle>>,
}

impl Engine {
    pub fn new(config: EngineConfig, parts: EngineParts) -> EngineResult<Self> {
        config.validate()?;

        let capture = Arc::new(CaptureSource::new(
            parts.capture_backend,
            config.input_sample_rate,
            config.frame_samples,
        ));

        let analyzer = Arc::new(SpectralAnalyzer::new(AnalyzerConfig {
            fft_size: config.fft_size,
            sample_rate: config.input_sample_rate,
        }));

        let scheduler = Arc::new(PlaybackScheduler::new(
            Arc::new(AudioClock::new()),
            parts.voice_sink,
        ));

        let session = StreamingSession::new(
            parts.transport,
            Arc::clone(&capture),
            Arc::clone(&scheduler),
            SessionConfig::audio(config.voice.clone(), config.system_instruction.clone()),
        );

        let clips = ClipCache::new(parts.synthesizer, parts.clip_sink, config.voice.clone());

        Ok(Self {
            config,
            capture,
            analyzer,
            scheduler,
            session,
            clips,
            attachment: Mutex::new(None),
        })
    }

    /// Build an engine over the real devices and network collaborators.
    pub fn with_devices(config: EngineConfig) -> EngineResult<Self> {
        let parts = EngineParts {
            capture_backend: Box::new(DeviceCaptureBackend::new(
                config.input_sample_rate,
                config.frame_samples,
            )),
            transport: Arc::new(WsLiveTransport::new(config.live_url.clone())),
            synthesizer: Arc::new(HttpSynthesizer::new(
                config.synth_url.clone(),
                config.api_key.clone(),
            )?),
            voice_sink: Arc::new(DeviceSink::new(config.output_sample_rate)?),
            clip_sink: Arc::new(DeviceSink::new(config.output_sample_rate)?),
        };
        Self::new(config, parts)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start ambient analysis: capture plus the spectral analyzer, nothing
    /// network-facing.
    ///
    /// Idempotent; a denied microphone permission surfaces as a typed error
    /// and leaves the engine fully stopped.
    pub fn start_ambient(&self) -> EngineResult<()> {
        let handle = self.capture.start(None)?;

        let mut attachment = self.attachment.lock();
        if attachment.is_none() {
            *attachment = Some(self.analyzer.attach(&handle));
            debug!("analyzer attached to capture feed");
        }
        Ok(())
    }

    /// Latest analysis snapshot for visualizations. Never fails.
    pub fn snapshot(&self) -> AnalysisSnapshot {
        self.analyzer.snapshot()
    }

    /// Start (or toggle) the live conversation.
    ///
    /// Ambient analysis is brought up first so visualizations track the
    /// conversation; the capture source is shared, not reopened.
    pub async fn start_conversation(&self) -> EngineResult<()> {
        self.start_ambient()?;
        self.session.start().await?;
        Ok(())
    }

    /// Close the live conversation, leaving ambient analysis running.
    pub async fn stop_conversation(&self) {
        self.session.stop().await;
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session_stats(&self) -> SessionStatsSnapshot {
        self.session.stats()
    }

    /// Register the session lifecycle callback.
    pub fn on_session_event(&self, callback: SessionEventCallback) {
        self.session.on_event(callback);
    }

    /// Whether live response audio is currently scheduled or playing.
    pub fn is_speaking(&self) -> bool {
        self.scheduler.is_speaking()
    }

    /// Subscribe to speaking-flag transitions.
    pub fn speaking_changes(&self) -> tokio::sync::watch::Receiver<bool> {
        self.scheduler.speaking_changes()
    }

    /// Subscribe to session state transitions.
    pub fn session_state_changes(&self) -> tokio::sync::watch::Receiver<SessionState> {
        self.session.state_changes()
    }

    /// Best-effort sequential preload of the configured clip vocabulary.
    pub async fn preload_clips(&self) -> usize {
        self.clips.preload(&self.config.preload_phrases).await
    }

    /// Play one clip; synthesizes and backfills on a cache miss.
    pub async fn play_clip(&self, key: &str) -> EngineResult<()> {
        self.clips.play(key).await?;
        Ok(())
    }

    pub fn clips_loaded(&self) -> usize {
        self.clips.loaded_count()
    }

    pub fn clip_playing(&self) -> bool {
        self.clips.is_playing()
    }

    /// Full stop: session, analyzer attachment, then the microphone.
    ///
    /// The capture source is released here and only here, once neither the
    /// analyzer nor the session needs it. Idempotent on every path.
    pub async fn stop(&self) {
        self.session.stop().await;

        if self.attachment.lock().take().is_some() {
            debug!("analyzer detached");
        }

        self.capture.stop();
        info!("engine stopped");
    }
}

// Re-exported here so embedders can name the callback event type without
// reaching into the session module.
pub use session::SessionEvent;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::capture::CaptureResult;
    use crate::core::playback::NullSink;
    use crate::core::session::{LiveConnection, TransportError, TransportResult};
    use crate::core::synth::SynthesisResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    struct IdleBackend {
        opened: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    impl CaptureBackend for IdleBackend {
        fn open(
            &mut self,
            _device: Option<&str>,
            _frames: broadcast::Sender<crate::core::AudioFrame>,
        ) -> CaptureResult<()> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct RefusingTransport;

    #[async_trait]
    impl LiveTransport for RefusingTransport {
        async fn open(&self, _config: &SessionConfig) -> TransportResult<LiveConnection> {
            Err(TransportError::Open("offline".into()))
        }
    }

    struct SilentSynth;

    #[async_trait]
    impl SpeechSynthesizer for SilentSynth {
        async fn synthesize(&self, _text: &str, _voice: &str) -> SynthesisResult<String> {
            let frame =
                crate::core::AudioFrame::new(vec![0i16; 2400], crate::core::OUTPUT_SAMPLE_RATE);
            Ok(crate::core::codec::encode_frame(&frame).data)
        }
    }

    fn test_engine(opened: Arc<AtomicUsize>, closed: Arc<AtomicBool>) -> Engine {
        Engine::new(
            EngineConfig::default(),
            EngineParts {
                capture_backend: Box::new(IdleBackend { opened, closed }),
                transport: Arc::new(RefusingTransport),
                synthesizer: Arc::new(SilentSynth),
                voice_sink: Arc::new(NullSink),
                clip_sink: Arc::new(NullSink),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_ambient_start_is_idempotent() {
        let opened = Arc::new(AtomicUsize::new(0));
        let engine = test_engine(opened.clone(), Arc::new(AtomicBool::new(false)));

        engine.start_ambient().unwrap();
        engine.start_ambient().unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 1);

        // Snapshot polling never fails, even with no frames yet.
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.average_level, 0.0);
    }

    #[tokio::test]
    async fn test_failed_session_open_keeps_ambient_alive() {
        let engine = test_engine(
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicBool::new(false)),
        );

        let err = engine.start_conversation().await.unwrap_err();
        assert!(matches!(err, crate::errors::EngineError::Session(_)));

        // Transport failure never tears down the local capture pipeline.
        assert!(engine.capture.is_started());
        assert_eq!(engine.session_state(), SessionState::Errored);
    }

    #[tokio::test]
    async fn test_full_stop_releases_microphone() {
        let closed = Arc::new(AtomicBool::new(false));
        let engine = test_engine(Arc::new(AtomicUsize::new(0)), closed.clone());

        engine.start_ambient().unwrap();
        engine.stop().await;

        assert!(closed.load(Ordering::SeqCst));
        assert!(!engine.capture.is_started());

        // Stopping again is a no-op.
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_clip_playback_independent_of_session() {
        let engine = test_engine(
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicBool::new(false)),
        );

        assert_eq!(engine.preload_clips().await, 4);
        engine.play_clip("Welcome back.").await.unwrap();
        assert!(engine.clip_playing());
        assert!(!engine.is_speaking(), "clips never touch the live scheduler");
    }
}
