//! Frequency-domain analysis of the live capture feed.
//!
//! [`SpectralAnalyzer`] keeps a rolling window of the most recent capture
//! samples and computes an FFT snapshot on demand. Snapshots are cached per
//! ingest generation, so any number of readers can poll on the render clock
//! without re-running the transform, and a reader never observes a partial
//! update.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

use parking_lot::Mutex;
use realfft::num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use super::capture::CaptureHandle;
use super::codec::AudioFrame;

/// Configuration for [`SpectralAnalyzer`].
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// FFT window size in samples. Must be a power of two.
    pub fft_size: usize,
    /// Sample rate of the analyzed feed in Hz.
    pub sample_rate: u32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            sample_rate: crate::core::codec::INPUT_SAMPLE_RATE,
        }
    }
}

/// Derived metrics for one analysis generation.
///
/// `magnitudes` holds one linear magnitude per frequency bin
/// (`fft_size / 2` bins). The previous snapshot is discarded on recompute;
/// renderers copy out whatever they need.
#[derive(Debug, Clone)]
pub struct AnalysisSnapshot {
    pub average_level: f32,
    pub peak_frequency_hz: f32,
    pub magnitudes: Arc<[f32]>,
}

impl AnalysisSnapshot {
    fn silent(bins: usize) -> Self {
        Self {
            average_level: 0.0,
            peak_frequency_hz: 0.0,
            magnitudes: vec![0.0; bins].into(),
        }
    }
}

struct AnalyzerState {
    ring: VecDeque<f32>,
    generation: u64,
    computed_generation: u64,
    last: AnalysisSnapshot,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

/// Continuous spectral analyzer over one capture feed.
pub struct SpectralAnalyzer {
    config: AnalyzerConfig,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    state: Mutex<AnalyzerState>,
}

impl SpectralAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.fft_size);

        let freq_size = config.fft_size / 2 + 1;
        let scratch = vec![Complex32::new(0.0, 0.0); fft.get_scratch_len()];

        let window = hann_window(config.fft_size);
        let bins = config.fft_size / 2;

        Self {
            state: Mutex::new(AnalyzerState {
                ring: VecDeque::with_capacity(config.fft_size),
                generation: 0,
                computed_generation: 0,
                last: AnalysisSnapshot::silent(bins),
                input: vec![0.0; config.fft_size],
                spectrum: vec![Complex32::new(0.0, 0.0); freq_size],
                scratch,
            }),
            config,
            fft,
            window,
        }
    }

    /// Feed one capture frame into the rolling analysis window.
    pub fn ingest(&self, frame: &AudioFrame) {
        let mut state = self.state.lock();
        for &sample in frame.samples() {
            if state.ring.len() == self.config.fft_size {
                state.ring.pop_front();
            }
            state.ring.push_back(sample as f32 / 32768.0);
        }
        state.generation += 1;
    }

    /// Current analysis snapshot.
    ///
    /// Never fails: when no new samples arrived since the last computation
    /// (or the capture feed is gone), the last-known snapshot is returned
    /// unchanged. The transform runs at most once per ingest generation no
    /// matter how many readers poll.
    pub fn snapshot(&self) -> AnalysisSnapshot {
        let mut state = self.state.lock();

        if state.generation == state.computed_generation
            || state.ring.len() < self.config.fft_size
        {
            return state.last.clone();
        }

        let AnalyzerState {
            ring,
            input,
            spectrum,
            scratch,
            ..
        } = &mut *state;

        for (i, sample) in ring.iter().enumerate() {
            input[i] = sample * self.window[i];
        }

        if let Err(e) = self.fft.process_with_scratch(input, spectrum, scratch) {
            debug!("fft failed, keeping previous snapshot: {e}");
            return state.last.clone();
        }

        let bins = self.config.fft_size / 2;
        let scale = 2.0 / self.config.fft_size as f32;

        let mut magnitudes = Vec::with_capacity(bins);
        let mut sum = 0.0f32;
        let mut peak_bin = 0usize;
        let mut peak_value = 0.0f32;
        for (bin, c) in spectrum.iter().take(bins).enumerate() {
            let magnitude = (c.re * c.re + c.im * c.im).sqrt() * scale;
            if magnitude > peak_value {
                peak_value = magnitude;
                peak_bin = bin;
            }
            sum += magnitude;
            magnitudes.push(magnitude);
        }

        let bin_width = self.config.sample_rate as f32 / (2.0 * bins as f32);
        state.last = AnalysisSnapshot {
            average_level: sum / bins as f32,
            peak_frequency_hz: peak_bin as f32 * bin_width,
            magnitudes: magnitudes.into(),
        };
        state.computed_generation = state.generation;

        state.last.clone()
    }

    /// Attach to a capture feed; frames flow into the analyzer until the
    /// feed closes or the returned handle is dropped.
    pub fn attach(self: &Arc<Self>, handle: &CaptureHandle) -> AnalyzerHandle {
        let analyzer = Arc::clone(self);
        let mut frames = handle.subscribe();

        let task = tokio::spawn(async move {
            loop {
                match frames.recv().await {
                    Ok(frame) => analyzer.ingest(&frame),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "analyzer lagged behind the capture feed");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        AnalyzerHandle { task }
    }
}

/// Ownership of the ingestion task spawned by [`SpectralAnalyzer::attach`].
pub struct AnalyzerHandle {
    task: tokio::task::JoinHandle<()>,
}

impl Drop for AnalyzerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}
