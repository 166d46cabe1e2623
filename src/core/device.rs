//! Device audio I/O backed by cpal.
//!
//! [`DeviceCaptureBackend`] feeds the capture source from the default (or a
//! named) input device; [`DeviceSink`] drains scheduled playback into an
//! output device, emitting silence on underrun. Both live behind the engine
//! seams, so everything above this module runs without hardware.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::capture::{CaptureBackend, CaptureError, CaptureResult};
use super::codec::AudioFrame;
use super::playback::PlaybackSink;

/// Errors opening the playback device.
#[derive(Debug, thiserror::Error)]
#[error("playback device unavailable: {0}")]
pub struct PlaybackDeviceError(String);

/// List available input device names.
pub fn input_devices() -> CaptureResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::Device(format!("failed to enumerate devices: {e}")))?
        .filter_map(|d| d.name().ok())
        .collect();
    Ok(devices)
}

/// Microphone backend producing fixed-size mono i16 frames.
pub struct DeviceCaptureBackend {
    sample_rate: u32,
    frame_samples: usize,
    stream: Option<cpal::Stream>,
}

// cpal streams are !Send; the stream handle is only created and dropped
// under the capture source's backend lock and never touched concurrently.
unsafe impl Send for DeviceCaptureBackend {}

impl DeviceCaptureBackend {
    pub fn new(sample_rate: u32, frame_samples: usize) -> Self {
        Self {
            sample_rate,
            frame_samples,
            stream: None,
        }
    }
}

impl CaptureBackend for DeviceCaptureBackend {
    fn open(
        &mut self,
        device: Option<&str>,
        frames: broadcast::Sender<AudioFrame>,
    ) -> CaptureResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let input = match device {
            Some(name) => host
                .input_devices()
                .map_err(|e| CaptureError::Device(format!("failed to enumerate devices: {e}")))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| CaptureError::Device(format!("input device \"{name}\" not found")))?,
            None => host
                .default_input_device()
                .ok_or_else(|| CaptureError::Device("no input device available".into()))?,
        };

        debug!("using input device: {:?}", input.name());

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let frame_samples = self.frame_samples;
        let sample_rate = self.sample_rate;
        let mut pending: Vec<i16> = Vec::with_capacity(frame_samples);

        let stream = input
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for &sample in data {
                        pending.push((sample * 32767.0).clamp(-32768.0, 32767.0) as i16);
                        if pending.len() == frame_samples {
                            let full =
                                std::mem::replace(&mut pending, Vec::with_capacity(frame_samples));
                            // No subscribers is fine: the frame is a live
                            // instant, dropping it costs nothing.
                            let _ = frames.send(AudioFrame::new(full, sample_rate));
                        }
                    }
                },
                move |err| {
                    error!("capture stream error: {err}");
                },
                None,
            )
            .map_err(map_build_error)?;

        stream
            .play()
            .map_err(|e| CaptureError::Device(format!("failed to start stream: {e}")))?;

        info!(
            sample_rate = self.sample_rate,
            frame_samples = self.frame_samples,
            "capture device open"
        );
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            info!("releasing capture device");
            drop(stream);
        }
    }
}

fn map_build_error(e: cpal::BuildStreamError) -> CaptureError {
    let message = e.to_string();
    if message.to_ascii_lowercase().contains("permission") {
        CaptureError::PermissionDenied(message)
    } else {
        CaptureError::Device(message)
    }
}

/// Output device sink draining scheduled samples.
///
/// `begin` appends a buffer's samples to the device queue; because the
/// scheduler hands buffers over in playback order, back-to-back appending
/// is what makes the output gapless. `halt` empties the queue immediately.
pub struct DeviceSink {
    queue: Arc<Mutex<VecDeque<i16>>>,
    underruns: Arc<AtomicU64>,
    _stream: cpal::Stream,
}

// See DeviceCaptureBackend: the stream handle is write-once at construction
// and only dropped afterwards; all shared access goes through the queue.
unsafe impl Send for DeviceSink {}
unsafe impl Sync for DeviceSink {}

impl DeviceSink {
    pub fn new(sample_rate: u32) -> Result<Self, PlaybackDeviceError> {
        let host = cpal::default_host();
        let output = host
            .default_output_device()
            .ok_or_else(|| PlaybackDeviceError("no output device available".into()))?;

        debug!("using output device: {:?}", output.name());

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let queue: Arc<Mutex<VecDeque<i16>>> = Arc::new(Mutex::new(VecDeque::new()));
        let underruns = Arc::new(AtomicU64::new(0));

        let callback_queue = Arc::clone(&queue);
        let callback_underruns = Arc::clone(&underruns);

        let stream = output
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut queue = callback_queue.lock();
                    let mut starved = false;
                    for sample in data.iter_mut() {
                        match queue.pop_front() {
                            Some(s) => *sample = s as f32 / 32768.0,
                            None => {
                                *sample = 0.0;
                                starved = true;
                            }
                        }
                    }
                    if starved {
                        callback_underruns.fetch_add(1, Ordering::Relaxed);
                    }
                },
                move |err| {
                    error!("playback stream error: {err}");
                },
                None,
            )
            .map_err(|e| PlaybackDeviceError(format!("failed to build stream: {e}")))?;

        stream
            .play()
            .map_err(|e| PlaybackDeviceError(format!("failed to start stream: {e}")))?;

        info!(sample_rate, "playback device open");

        Ok(Self {
            queue,
            underruns,
            _stream: stream,
        })
    }

    /// Number of device callbacks that ran out of samples.
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

impl PlaybackSink for DeviceSink {
    fn begin(&self, frame: &AudioFrame) {
        let mut queue = self.queue.lock();
        queue.extend(frame.samples().iter().copied());
    }

    fn halt(&self) {
        let dropped = {
            let mut queue = self.queue.lock();
            let len = queue.len();
            queue.clear();
            len
        };
        if dropped > 0 {
            warn!(dropped_samples = dropped, "playback halted");
        }
    }
}
