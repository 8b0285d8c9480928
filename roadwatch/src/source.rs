//! Frame source: a dedicated capture thread publishing into a drop-oldest queue
//!
//! The producer reads frames as they arrive, throttles itself to the target
//! rate and never blocks on a slow consumer. The consumer pulls
//! `(frame_id, frame)` pairs with a poll timeout, so it also never blocks
//! forever once the producer is gone.

use crate::capture::{CaptureBackend, CaptureDevice, SourceId};
use crate::error::{PipelineError, Result};
use crate::queue::FrameQueue;
use crate::types::Frame;
use crate::worker::Worker;
use image::imageops::{self, FilterType};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::time::{Duration, Instant};

type SharedDevice = Arc<Mutex<Option<Box<dyn CaptureDevice>>>>;

#[derive(Debug, Clone)]
pub struct FrameSourceConfig {
    pub source: SourceId,
    /// Resize every captured frame to (width, height)
    pub resize: Option<(u32, u32)>,
    pub target_fps: f64,
    /// Number of most recent frames kept for the consumer
    pub queue_size: usize,
    pub poll_timeout: Duration,
    pub join_timeout: Duration,
}

impl Default for FrameSourceConfig {
    fn default() -> Self {
        Self {
            source: SourceId::Device(0),
            resize: None,
            target_fps: 20.0,
            queue_size: 5,
            poll_timeout: Duration::from_millis(500),
            join_timeout: Duration::from_secs(1),
        }
    }
}

impl From<&crate::config::RuntimeConfig> for FrameSourceConfig {
    fn from(cfg: &crate::config::RuntimeConfig) -> Self {
        Self {
            source: SourceId::parse(&cfg.source),
            resize: cfg.resize,
            target_fps: cfg.target_fps,
            queue_size: cfg.frame_queue,
            poll_timeout: cfg.poll_timeout(),
            join_timeout: cfg.join_timeout(),
        }
    }
}

/// Counters for one run of the source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub frames_evicted: u64,
    pub queued: usize,
}

pub struct FrameSource {
    config: FrameSourceConfig,
    backend: Arc<dyn CaptureBackend>,
    queue: FrameQueue<(u64, Frame)>,
    running: Arc<AtomicBool>,
    captured: Arc<AtomicU64>,
    device: SharedDevice,
    worker: Option<Worker>,
}

impl FrameSource {
    pub fn new(config: FrameSourceConfig, backend: Arc<dyn CaptureBackend>) -> Self {
        let queue = FrameQueue::new(config.queue_size);
        Self {
            config,
            backend,
            queue,
            running: Arc::new(AtomicBool::new(false)),
            captured: Arc::new(AtomicU64::new(0)),
            device: Arc::new(Mutex::new(None)),
            worker: None,
        }
    }

    pub fn config(&self) -> &FrameSourceConfig {
        &self.config
    }

    /// Open the capture resource and spawn the acquisition thread.
    ///
    /// Fails with `SourceUnavailable` if the resource cannot be opened. A
    /// running source is stopped first, so every call starts a fresh stream
    /// with frame ids from zero.
    pub fn start(&mut self) -> Result<()> {
        self.stop();

        let device = self.backend.open(&self.config.source).map_err(|e| match e {
            PipelineError::SourceUnavailable(_) => e,
            other => PipelineError::source_unavailable(format!(
                "{}: {}",
                self.config.source, other
            )),
        })?;

        self.queue = FrameQueue::new(self.config.queue_size);
        self.captured = Arc::new(AtomicU64::new(0));
        self.device = Arc::new(Mutex::new(Some(device)));
        self.running = Arc::new(AtomicBool::new(true));

        let producer = Producer {
            queue: self.queue.clone(),
            running: self.running.clone(),
            captured: self.captured.clone(),
            device: self.device.clone(),
            resize: self.config.resize,
            frame_interval: frame_interval(self.config.target_fps),
        };

        let worker = Worker::spawn("frame-source", move || producer.run()).map_err(|e| {
            self.running.store(false, Ordering::SeqCst);
            release(&self.device);
            PipelineError::source_unavailable(format!("failed to spawn capture thread: {}", e))
        })?;
        self.worker = Some(worker);

        log::info!(
            "Frame source started: {} via {} (target {:.1} fps, queue {})",
            self.config.source,
            self.backend.name(),
            self.config.target_fps,
            self.config.queue_size
        );
        Ok(())
    }

    /// Whether the producer is still capturing
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Lazy sequence of `(frame_id, frame)` pairs for the current run.
    ///
    /// Ends once the producer has stopped and the queue is drained.
    pub fn frames(&self) -> Frames {
        Frames {
            queue: self.queue.clone(),
            running: self.running.clone(),
            poll_timeout: self.config.poll_timeout,
        }
    }

    /// Signal the producer to exit, join it with a bounded wait and release
    /// the capture resource. Idempotent, and bounded even while a read hangs:
    /// if the producer still holds the device, it releases it on exit.
    pub fn stop(&mut self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let joined = match self.worker.take() {
            Some(mut worker) => worker.join_timeout(self.config.join_timeout),
            None => true,
        };
        if joined {
            release(&self.device);
        } else if !try_release(&self.device) {
            log::warn!("Capture read still in progress, device is released when it returns");
        }
        if was_running {
            let stats = self.stats();
            log::info!(
                "Frame source stopped: {} captured, {} dropped",
                stats.frames_captured,
                stats.frames_evicted
            );
        }
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.captured.load(Ordering::Relaxed),
            frames_evicted: self.queue.evicted_count(),
            queued: self.queue.len(),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn frame_interval(target_fps: f64) -> Duration {
    if target_fps > 0.0 && target_fps.is_finite() {
        Duration::from_secs_f64(1.0 / target_fps)
    } else {
        Duration::ZERO
    }
}

fn release(device: &SharedDevice) {
    let mut guard = device.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(mut dev) = guard.take() {
        dev.release();
    }
}

/// Release without waiting on a read in progress. Returns false if the
/// device is busy.
fn try_release(device: &SharedDevice) -> bool {
    let mut guard = match device.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::Poisoned(e)) => e.into_inner(),
        Err(TryLockError::WouldBlock) => return false,
    };
    if let Some(mut dev) = guard.take() {
        dev.release();
    }
    true
}

struct Producer {
    queue: FrameQueue<(u64, Frame)>,
    running: Arc<AtomicBool>,
    captured: Arc<AtomicU64>,
    device: SharedDevice,
    resize: Option<(u32, u32)>,
    frame_interval: Duration,
}

impl Producer {
    fn run(self) {
        let mut frame_id = 0_u64;

        while self.running.load(Ordering::SeqCst) {
            let started = Instant::now();

            let read = {
                let mut guard = self.device.lock().unwrap_or_else(PoisonError::into_inner);
                match guard.as_mut() {
                    Some(device) => device.read(),
                    None => Ok(None),
                }
            };

            let frame = match read {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!("Capture source reached end of stream after {} frames", frame_id);
                    break;
                }
                Err(e) => {
                    log::info!("Capture read failed, stopping producer: {}", e);
                    break;
                }
            };

            let frame = match self.resize {
                Some((w, h)) if frame.dimensions() != (w, h) => {
                    imageops::resize(&frame, w, h, FilterType::Triangle)
                }
                _ => frame,
            };

            self.queue.push((frame_id, frame));
            self.captured.fetch_add(1, Ordering::Relaxed);
            frame_id += 1;

            let elapsed = started.elapsed();
            if elapsed < self.frame_interval {
                std::thread::sleep(self.frame_interval - elapsed);
            }
        }

        self.running.store(false, Ordering::SeqCst);
        release(&self.device);
    }
}

/// Consumer side of a frame source run
pub struct Frames {
    queue: FrameQueue<(u64, Frame)>,
    running: Arc<AtomicBool>,
    poll_timeout: Duration,
}

impl Iterator for Frames {
    type Item = (u64, Frame);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.queue.pop_timeout(self.poll_timeout) {
                return Some(item);
            }
            // The producer may have pushed its last frame just before exiting
            if !self.running.load(Ordering::SeqCst) {
                return self.queue.try_pop();
            }
        }
    }
}
