//! Microphone capture ownership.
//!
//! [`CaptureSource`] is the single owner of the microphone stream. The
//! actual device is hidden behind [`CaptureBackend`] so the rest of the
//! pipeline (and the tests) never touch hardware directly. Captured audio is
//! published as fixed-size [`AudioFrame`]s on a broadcast channel; the
//! spectral analyzer and the live session each subscribe independently and
//! neither owns the stream lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::codec::AudioFrame;

/// Capacity of the frame broadcast channel. At ~256 ms per frame this is
/// far more lag than any live subscriber should ever accumulate.
const FRAME_CHANNEL_CAPACITY: usize = 32;

/// Errors surfaced when opening the capture device.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    /// The user (or OS) denied microphone access. The source stays in the
    /// `not started` state and the rest of the engine keeps working.
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// The capture device is missing or failed to open.
    #[error("capture device unavailable: {0}")]
    Device(String),
}

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Device seam for [`CaptureSource`].
///
/// Implementations own the underlying stream. `open` must begin delivering
/// fixed-size frames into the provided sender; `close` must release the
/// device unconditionally and be a no-op when nothing is open.
pub trait CaptureBackend: Send {
    fn open(
        &mut self,
        device: Option<&str>,
        frames: broadcast::Sender<AudioFrame>,
    ) -> CaptureResult<()>;

    fn close(&mut self);
}

/// Read-side handle to a capture source.
///
/// Cheap to clone; every holder can [`subscribe`](CaptureHandle::subscribe)
/// for its own frame feed without affecting the stream lifecycle.
#[derive(Debug, Clone)]
pub struct CaptureHandle {
    frames: broadcast::Sender<AudioFrame>,
    sample_rate: u32,
    frame_samples: usize,
}

impl CaptureHandle {
    /// Subscribe to the live frame feed.
    pub fn subscribe(&self) -> broadcast::Receiver<AudioFrame> {
        self.frames.subscribe()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }
}

/// Exclusive owner of the microphone stream.
pub struct CaptureSource {
    backend: Mutex<Box<dyn CaptureBackend>>,
    frames: broadcast::Sender<AudioFrame>,
    started: AtomicBool,
    sample_rate: u32,
    frame_samples: usize,
}

impl CaptureSource {
    pub fn new(backend: Box<dyn CaptureBackend>, sample_rate: u32, frame_samples: usize) -> Self {
        let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        Self {
            backend: Mutex::new(backend),
            frames,
            started: AtomicBool::new(false),
            sample_rate,
            frame_samples,
        }
    }

    /// Open the capture stream and start publishing frames.
    ///
    /// Calling `start` while already started is a no-op that returns the
    /// existing handle; two device streams are never opened. A failed open
    /// (permission denied, missing device) leaves the source `not started`.
    pub fn start(&self, device: Option<&str>) -> CaptureResult<CaptureHandle> {
        let mut backend = self.backend.lock();

        if self.started.load(Ordering::Acquire) {
            debug!("capture already started, returning existing handle");
            return Ok(self.handle());
        }

        info!(
            sample_rate = self.sample_rate,
            frame_samples = self.frame_samples,
            "starting capture"
        );

        backend.open(device, self.frames.clone())?;
        self.started.store(true, Ordering::Release);

        Ok(self.handle())
    }

    /// Release the capture stream.
    ///
    /// Idempotent and safe on every exit path: stopping a source that never
    /// started, or stopping twice, is a no-op.
    pub fn stop(&self) {
        let mut backend = self.backend.lock();

        if !self.started.swap(false, Ordering::AcqRel) {
            debug!("capture stop requested while not started");
        } else {
            info!("stopping capture");
        }

        // Close unconditionally so a half-open backend is still released.
        backend.close();
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Read-side handle for subscribers. Valid regardless of stream state;
    /// a receiver simply stays empty until the stream is started.
    pub fn handle(&self) -> CaptureHandle {
        CaptureHandle {
            frames: self.frames.clone(),
            sample_rate: self.sample_rate,
            frame_samples: self.frame_samples,
        }
    }
}

/// Backend that pushes pre-scripted frames, for pipelines without hardware.
///
/// Frames are delivered on a tokio task at the configured tick. Useful both
/// in tests and to drive the engine from non-device inputs.
pub struct ScriptedBackend {
    frames: Vec<AudioFrame>,
    tick: std::time::Duration,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl ScriptedBackend {
    pub fn new(frames: Vec<AudioFrame>, tick: std::time::Duration) -> Self {
        Self {
            frames,
            tick,
            task: None,
        }
    }
}

impl CaptureBackend for ScriptedBackend {
    fn open(
        &mut self,
        _device: Option<&str>,
        frames: broadcast::Sender<AudioFrame>,
    ) -> CaptureResult<()> {
        let script = self.frames.clone();
        let tick = self.tick;
        self.task = Some(tokio::spawn(async move {
            for frame in script {
                tokio::time::sleep(tick).await;
                if frames.send(frame).is_err() {
                    warn!("scripted capture has no subscribers, stopping");
                    break;
                }
            }
        }));
        Ok(())
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::INPUT_SAMPLE_RATE;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    struct FnBackend<F>
    where
        F: FnMut(Option<&str>, broadcast::Sender<AudioFrame>) -> CaptureResult<()> + Send,
    {
        open_fn: F,
        closed: Arc<AtomicBool>,
    }

    impl<F> CaptureBackend for FnBackend<F>
    where
        F: FnMut(Option<&str>, broadcast::Sender<AudioFrame>) -> CaptureResult<()> + Send,
    {
        fn open(
            &mut self,
            device: Option<&str>,
            frames: broadcast::Sender<AudioFrame>,
        ) -> CaptureResult<()> {
            (self.open_fn)(device, frames)
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::Release);
        }
    }

    fn counting_source(opens: Arc<AtomicUsize>, closed: Arc<AtomicBool>) -> CaptureSource {
        let backend = FnBackend {
            open_fn: move |_, _| {
                opens.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            closed,
        };
        CaptureSource::new(Box::new(backend), INPUT_SAMPLE_RATE, 4096)
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let opens = Arc::new(AtomicUsize::new(0));
        let source = counting_source(opens.clone(), Arc::new(AtomicBool::new(false)));

        source.start(None).unwrap();
        source.start(None).unwrap();
        source.start(None).unwrap();

        // The device was opened exactly once.
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(source.is_started());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_safe_when_never_started() {
        let closed = Arc::new(AtomicBool::new(false));
        let source = counting_source(Arc::new(AtomicUsize::new(0)), closed.clone());

        // Never started: stop must not panic and must leave state untouched.
        source.stop();
        assert!(!source.is_started());

        source.start(None).unwrap();
        source.stop();
        source.stop();
        assert!(!source.is_started());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_permission_denied_leaves_not_started() {
        let backend = FnBackend {
            open_fn: |_, _| Err(CaptureError::PermissionDenied("user dismissed".into())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let source = CaptureSource::new(Box::new(backend), INPUT_SAMPLE_RATE, 4096);

        let err = source.start(None).unwrap_err();
        assert!(matches!(err, CaptureError::PermissionDenied(_)));
        assert!(!source.is_started());
    }

    #[tokio::test]
    async fn test_scripted_backend_delivers_frames() {
        let frame = AudioFrame::new(vec![7i16; 64], INPUT_SAMPLE_RATE);
        let backend = ScriptedBackend::new(
            vec![frame.clone(), frame.clone()],
            std::time::Duration::from_millis(1),
        );
        let source = CaptureSource::new(Box::new(backend), INPUT_SAMPLE_RATE, 64);

        let handle = source.start(None).unwrap();
        let mut rx = handle.subscribe();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.samples(), frame.samples());
        assert_eq!(second.len(), 64);

        source.stop();
    }
}
