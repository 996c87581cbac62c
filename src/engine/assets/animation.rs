// Animated images decoded frame by frame on a background worker

use super::cache::Release;
use super::loader::ImageDecoder;
use super::quantize::Quantizer;
use super::GraphicsError;
use crate::engine::config::GraphicsConfig;
use crate::engine::renderer::{FilterMode, GpuBackend, GpuTexture};
use log::{debug, trace, warn};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Progress of an animation load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    /// The worker is still producing frames
    Loading,
    /// Every source frame has been uploaded
    Complete,
    /// The worker stopped on an error; frames produced before it stay usable
    Failed(String),
    /// The load was cancelled and its frames released
    Cancelled,
}

#[derive(Debug)]
struct FrameState {
    frames: Vec<Arc<GpuTexture>>,
    expected_frames: Option<usize>,
    frame_duration: Duration,
    status: LoadStatus,
    /// Error that ended the load, handed to `begin_load` when no frame exists
    error: Option<GraphicsError>,
}

/// A growing sequence of animation frames.
///
/// The background worker is the only writer and only ever appends, in source
/// order. Readers see a prefix of the final sequence: when frame `i` is
/// visible so are `0..i`. Frame count never decreases until the record is
/// cancelled.
#[derive(Debug)]
pub struct AnimationRecord {
    path: PathBuf,
    state: Mutex<FrameState>,
    changed: Condvar,
    cancelled: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AnimationRecord {
    fn new(path: PathBuf, frame_duration: Duration) -> Self {
        Self {
            path,
            state: Mutex::new(FrameState {
                frames: Vec::new(),
                expected_frames: None,
                frame_duration,
                status: LoadStatus::Loading,
                error: None,
            }),
            changed: Condvar::new(),
            cancelled: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrameState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Source the frames are decoded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of frames available right now
    pub fn frame_count(&self) -> usize {
        self.lock().frames.len()
    }

    /// Total frames the source holds, once known
    pub fn expected_frames(&self) -> Option<usize> {
        self.lock().expected_frames
    }

    /// Frame `index`, or `None` if it has not been produced yet
    pub fn frame(&self, index: usize) -> Option<Arc<GpuTexture>> {
        self.lock().frames.get(index).cloned()
    }

    /// Snapshot of the frames produced so far
    pub fn frames(&self) -> Vec<Arc<GpuTexture>> {
        self.lock().frames.clone()
    }

    /// How long each frame is displayed
    pub fn frame_duration(&self) -> Duration {
        self.lock().frame_duration
    }

    pub fn status(&self) -> LoadStatus {
        self.lock().status.clone()
    }

    /// True once the worker has stopped, for whatever reason
    pub fn is_done(&self) -> bool {
        self.lock().status != LoadStatus::Loading
    }

    /// True when every source frame was produced
    pub fn is_complete(&self) -> bool {
        self.lock().status == LoadStatus::Complete
    }

    /// Switch filtering on every frame produced so far
    pub fn set_filter(&self, mode: FilterMode) {
        for frame in self.lock().frames.iter() {
            frame.set_filter(mode);
        }
    }

    /// Block until at least `count` frames exist, the load stops, or
    /// `timeout` passes. Returns the frame count at wake-up.
    pub fn wait_for_frames(&self, count: usize, timeout: Duration) -> usize {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| {
                s.frames.len() < count && s.status == LoadStatus::Loading
            })
            .unwrap_or_else(PoisonError::into_inner);
        state.frames.len()
    }

    /// Block until the worker stops or `timeout` passes
    pub fn wait_until_done(&self, timeout: Duration) -> LoadStatus {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| s.status == LoadStatus::Loading)
            .unwrap_or_else(PoisonError::into_inner);
        state.status.clone()
    }

    /// Stop the worker and release every frame.
    ///
    /// Returns after the worker has exited, so no upload is in flight once
    /// the frames are gone. Frames still referenced elsewhere are freed when
    /// the last reference drops.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);

        let discarded = {
            let mut state = self.lock();
            if state.status == LoadStatus::Loading {
                state.status = LoadStatus::Cancelled;
            }
            std::mem::take(&mut state.frames)
        };
        self.changed.notify_all();

        self.join_worker();

        if !discarded.is_empty() {
            debug!(
                "Released {} frames of {}",
                discarded.len(),
                self.path.display()
            );
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn attach_worker(&self, handle: JoinHandle<()>) {
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn join_worker(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("Frame worker for {} panicked", self.path.display());
            }
        }
    }

    fn set_expected_frames(&self, expected: Option<usize>) {
        self.lock().expected_frames = expected;
    }

    fn set_frame_duration(&self, duration: Duration) {
        self.lock().frame_duration = duration;
    }

    /// Append a frame; returns false (dropping the texture) once cancelled
    fn push_frame(&self, texture: GpuTexture) -> bool {
        let mut state = self.lock();
        if self.is_cancelled() {
            return false;
        }

        state.frames.push(Arc::new(texture));
        let count = state.frames.len();
        drop(state);

        self.changed.notify_all();
        trace!("{}: frame {} ready", self.path.display(), count);
        true
    }

    fn finish(&self, result: Result<(), GraphicsError>) {
        let mut state = self.lock();
        if state.status != LoadStatus::Loading {
            return;
        }

        match result {
            // The flag is read under the lock `cancel` takes to discard frames
            _ if self.is_cancelled() => {
                state.status = LoadStatus::Cancelled;
                debug!("{}: worker stopped by cancel", self.path.display());
            }
            Err(GraphicsError::Cancelled(_)) => {
                state.status = LoadStatus::Cancelled;
            }
            Ok(()) => {
                let produced = state.frames.len();
                if let Some(expected) = state.expected_frames {
                    if expected != produced {
                        warn!(
                            "{} announced {} frames but held {}",
                            self.path.display(),
                            expected,
                            produced
                        );
                    }
                }
                state.expected_frames = Some(produced);
                state.status = LoadStatus::Complete;
                debug!("Loaded {} frames of {}", produced, self.path.display());
            }
            Err(e) => {
                warn!(
                    "Animation {} stopped after {} frames: {}",
                    self.path.display(),
                    state.frames.len(),
                    e
                );
                state.status = LoadStatus::Failed(e.to_string());
                state.error = Some(e);
            }
        }

        drop(state);
        self.changed.notify_all();
    }

    /// Wait for the first frame, or for the error that prevented it
    fn wait_for_first_frame(&self) -> Result<(), GraphicsError> {
        let state = self.lock();
        let mut state = self
            .changed
            .wait_while(state, |s| s.frames.is_empty() && s.status == LoadStatus::Loading)
            .unwrap_or_else(PoisonError::into_inner);

        if !state.frames.is_empty() {
            return Ok(());
        }

        let error = state.error.take();
        let status = state.status.clone();
        drop(state);
        self.join_worker();

        Err(match (error, status) {
            (Some(e), _) => e,
            (None, LoadStatus::Cancelled) => GraphicsError::Cancelled(self.path.clone()),
            (None, _) => GraphicsError::InvalidImage {
                path: self.path.clone(),
                reason: "source contains no frames".into(),
            },
        })
    }
}

impl Release for Arc<AnimationRecord> {
    fn release(self) {
        self.cancel();
    }
}

/// Starts animation loads, one background worker per load
pub struct FrameLoader {
    backend: Arc<dyn GpuBackend>,
    decoder: Arc<dyn ImageDecoder>,
    quantizer: Arc<dyn Quantizer>,
    config: Arc<GraphicsConfig>,
}

impl FrameLoader {
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        decoder: Arc<dyn ImageDecoder>,
        quantizer: Arc<dyn Quantizer>,
        config: Arc<GraphicsConfig>,
    ) -> Self {
        Self {
            backend,
            decoder,
            quantizer,
            config,
        }
    }

    /// Start decoding `path` and return once its first frame is uploaded.
    ///
    /// The remaining frames keep arriving on the worker. Errors raised before
    /// the first frame exists are returned here; later ones mark the record
    /// `Failed`.
    pub fn begin_load(&self, path: &Path) -> Result<Arc<AnimationRecord>, GraphicsError> {
        let record = Arc::new(AnimationRecord::new(
            path.to_path_buf(),
            self.config.default_frame_duration,
        ));

        let worker = FrameWorker {
            record: Arc::clone(&record),
            backend: Arc::clone(&self.backend),
            decoder: Arc::clone(&self.decoder),
            quantizer: Arc::clone(&self.quantizer),
            config: Arc::clone(&self.config),
        };

        let name = path
            .file_name()
            .map(|name| format!("frames-{}", name.to_string_lossy()))
            .unwrap_or_else(|| "frames".to_string());
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || worker.run())?;
        record.attach_worker(handle);

        record.wait_for_first_frame()?;
        Ok(record)
    }
}

/// State moved onto the worker thread
struct FrameWorker {
    record: Arc<AnimationRecord>,
    backend: Arc<dyn GpuBackend>,
    decoder: Arc<dyn ImageDecoder>,
    quantizer: Arc<dyn Quantizer>,
    config: Arc<GraphicsConfig>,
}

impl FrameWorker {
    fn run(self) {
        trace!("Frame worker started for {}", self.record.path.display());

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.produce_frames()))
            .unwrap_or_else(|_| {
                Err(GraphicsError::InvalidImage {
                    path: self.record.path.clone(),
                    reason: "frame worker panicked".into(),
                })
            });
        self.record.finish(result);

        trace!("Frame worker stopped for {}", self.record.path.display());
    }

    fn produce_frames(&self) -> Result<(), GraphicsError> {
        let mut source = self.decoder.open_animation(&self.record.path)?;
        self.record.set_expected_frames(source.frame_count());

        let label = self.record.path.display().to_string();
        let mut index = 0usize;

        loop {
            if self.record.is_cancelled() {
                debug!("{}: cancelled after {} frames", label, index);
                return Err(GraphicsError::Cancelled(self.record.path.clone()));
            }

            let Some(frame) = source.next_frame() else {
                return Ok(());
            };
            let frame = frame?;

            if index == 0 {
                let duration = self.config.frame_duration(frame.delay);
                self.record.set_frame_duration(duration);
            }

            let quantized = self.quantizer.quantize(&frame.image);
            let texture = GpuTexture::from_image(
                &self.backend,
                &quantized,
                FilterMode::Linear,
                &format!("{} #{}", label, index),
            )?;

            if !self.record.push_frame(texture) {
                return Err(GraphicsError::Cancelled(self.record.path.clone()));
            }
            index += 1;
        }
    }
}
