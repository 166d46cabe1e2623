//! voxa — a real-time, bidirectional conversational audio engine.
//!
//! The pipeline captures microphone audio, runs local frequency-domain
//! analysis for live visualization, streams encoded audio to a remote
//! conversational endpoint, schedules the decoded response audio for
//! gapless playback, and keeps a small pre-fetched cache of short
//! synthesized voice clips for near-instant playback.
//!
//! The [`engine::Engine`] composition root wires three independent use
//! cases: ambient analysis, live conversation, and cached clip playback.
//! Every hardware and network boundary is a trait seam, so the whole
//! pipeline runs (and is tested) without devices or connectivity.

pub mod config;
pub mod core;
pub mod engine;
pub mod errors;

// Re-export commonly used items for convenience
pub use crate::config::{ConfigError, EngineConfig};
pub use crate::core::*;
pub use crate::engine::{Engine, EngineParts};
pub use crate::errors::{EngineError, EngineResult};
