pub mod analyzer;
pub mod capture;
pub mod clips;
pub mod codec;
pub mod device;
pub mod playback;
pub mod session;
pub mod synth;

// Re-export commonly used types for convenience
pub use analyzer::{AnalysisSnapshot, AnalyzerConfig, AnalyzerHandle, SpectralAnalyzer};
pub use capture::{
    CaptureBackend, CaptureError, CaptureHandle, CaptureResult, CaptureSource, ScriptedBackend,
};
pub use clips::{ClipCache, ClipError, ClipResult};
pub use codec::{
    AudioFrame, CAPTURE_FRAME_SAMPLES, DecodeError, DecodeResult, EncodedChunk, INPUT_SAMPLE_RATE,
    OUTPUT_SAMPLE_RATE, PCM_MIME_16K,
};
pub use device::{DeviceCaptureBackend, DeviceSink, PlaybackDeviceError};
pub use playback::{
    AudioClock, NullSink, PlaybackClock, PlaybackItem, PlaybackScheduler, PlaybackSink,
};
pub use session::{
    LiveConnection, LiveSender, LiveTransport, ResponseModality, ServerEvent, SessionConfig,
    SessionError, SessionEvent, SessionEventCallback, SessionResult, SessionState, SessionStats,
    SessionStatsSnapshot, StreamingSession, TransportError, TransportResult, WsLiveTransport,
};
pub use synth::{HttpSynthesizer, SpeechSynthesizer, SynthesisError, SynthesisResult};
