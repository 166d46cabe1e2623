//! Top-level error surface of the engine.

use crate::config::ConfigError;
use crate::core::capture::CaptureError;
use crate::core::clips::ClipError;
use crate::core::device::PlaybackDeviceError;
use crate::core::session::SessionError;
use crate::core::synth::SynthesisError;

/// Aggregated error type for the composition root.
///
/// Each pipeline concern keeps its own typed error; this enum only folds
/// them together at the engine surface so callers can match on the failure
/// domain without unwrapping strings.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Clip(#[from] ClipError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    PlaybackDevice(#[from] PlaybackDeviceError),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
