//! Synchronous playback engine with an asynchronous completion task
//!
//! The engine owns the sole I2S output peripheral and accepts one clip at a
//! time. `submit` prepares the buffer (padding, pop suppression, gain),
//! starts the peripheral and hands the buffer to a background completion
//! task. That task counts the hardware's per-block transmission
//! notifications and tears the session down when the whole buffer has been
//! sent, or earlier if a stop was requested and the clip permits it.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::EngineError;
use crate::hal::AudioOutput;

/// Shortest buffer the peripheral is given, in samples. The DMA completion
/// count is inferred from total length divided by the block size, and very
/// short clips would under-report; anything shorter is zero-padded up to
/// this length.
pub const MIN_PADDED_SAMPLES: usize = 42_024;

/// Leading samples forced to zero to suppress the audible start-of-stream
/// pop caused by DC bias, independent of clip content.
pub const POP_GUARD_SAMPLES: usize = 1_000;

/// Samples per DMA block; one completion notification is raised per block,
/// so a stop request is honoured at block granularity only.
pub const BLOCK_SAMPLES: usize = 1_024;

/// How long the completion task waits for a single block notification
/// before declaring the peripheral wedged and tearing the session down.
const BLOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// A prepared buffer handed from the submitter to the completion task.
///
/// Ownership of the samples moves here at submission time; the completion
/// task is the only party that releases them.
struct CompletionJob {
    samples: Vec<i16>,
    blocks: usize,
    stoppable: bool,
}

/// The playback engine; process-wide singleton owning the output peripheral
pub struct PlaybackEngine {
    output: Arc<dyn AudioOutput>,
    playing: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    idle: Arc<(Mutex<()>, Condvar)>,
    job_tx: Option<Sender<CompletionJob>>,
    worker: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    /// Create the engine and spawn its completion task
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        let playing = Arc::new(AtomicBool::new(false));
        let stop_requested = Arc::new(AtomicBool::new(false));
        let idle = Arc::new((Mutex::new(()), Condvar::new()));
        let (job_tx, job_rx) = bounded::<CompletionJob>(1);

        let worker = {
            let output = output.clone();
            let block_events = output.block_events();
            let playing = playing.clone();
            let stop_requested = stop_requested.clone();
            let idle = idle.clone();
            std::thread::spawn(move || {
                completion_loop(job_rx, block_events, output, playing, stop_requested, idle);
            })
        };

        Self {
            output,
            playing,
            stop_requested,
            idle,
            job_tx: Some(job_tx),
            worker: Some(worker),
        }
    }

    /// Whether a session is currently playing
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Request that the current clip stop at the next block boundary.
    ///
    /// Best-effort: honoured only for clips submitted as stoppable, and only
    /// between DMA blocks. Safe to call from any thread, including the touch
    /// monitor.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Play a clip, blocking until any previous session has finished.
    ///
    /// Returns once the buffer has been handed to the peripheral; completion
    /// happens in the background. A peripheral start/write failure is
    /// returned to the caller and leaves the `playing` flag set, so the
    /// engine can wedge on a dead peripheral; see `request_stop` for the
    /// only recovery path the hardware offers (a stoppable teardown).
    pub fn submit(
        &self,
        samples: Vec<i16>,
        gain: f32,
        stoppable: bool,
    ) -> Result<(), EngineError> {
        if samples.is_empty() {
            return Err(EngineError::Allocation(
                "Refusing to play an empty clip".to_string(),
            ));
        }

        // Wait for the previous session's teardown
        {
            let (lock, cvar) = &*self.idle;
            let mut guard = lock.lock();
            while self.playing.load(Ordering::SeqCst) {
                cvar.wait(&mut guard);
            }
            self.stop_requested.store(false, Ordering::SeqCst);
            self.playing.store(true, Ordering::SeqCst);
        }

        let buffer = prepare_buffer(samples, gain);
        let blocks = buffer.len().div_ceil(BLOCK_SAMPLES);

        tracing::debug!(
            "PlaybackEngine: submitting {} samples ({} blocks, gain {}, stoppable {})",
            buffer.len(),
            blocks,
            gain,
            stoppable
        );

        self.output.start()?;
        self.output.write(&buffer)?;

        let job = CompletionJob {
            samples: buffer,
            blocks,
            stoppable,
        };
        self.job_tx
            .as_ref()
            .and_then(|tx| tx.send(job).ok())
            .ok_or_else(|| {
                EngineError::HardwareIo("Completion task is no longer running".to_string())
            })?;

        Ok(())
    }

    /// Play a clip and block until its completion task has torn it down
    pub fn submit_and_wait(
        &self,
        samples: Vec<i16>,
        gain: f32,
        stoppable: bool,
    ) -> Result<(), EngineError> {
        self.submit(samples, gain, stoppable)?;
        let (lock, cvar) = &*self.idle;
        let mut guard = lock.lock();
        while self.playing.load(Ordering::SeqCst) {
            cvar.wait(&mut guard);
        }
        Ok(())
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        // Closing the job channel ends the completion loop
        self.job_tx.take();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("PlaybackEngine: completion task panicked");
            }
        }
    }
}

/// Pad, pop-guard and scale a clip into the buffer handed to the peripheral.
///
/// Gain is applied with saturation to the i16 range; wrapping would turn
/// loud cues into wrap-around noise, saturation merely distorts.
fn prepare_buffer(mut samples: Vec<i16>, gain: f32) -> Vec<i16> {
    for sample in samples.iter_mut().skip(POP_GUARD_SAMPLES) {
        let scaled = f32::from(*sample) * gain;
        *sample = scaled.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
    }
    for sample in samples.iter_mut().take(POP_GUARD_SAMPLES) {
        *sample = 0;
    }
    if samples.len() < MIN_PADDED_SAMPLES {
        samples.resize(MIN_PADDED_SAMPLES, 0);
    }
    samples
}

/// Background completion task: counts block notifications, tears down the
/// session and releases the buffer.
fn completion_loop(
    job_rx: Receiver<CompletionJob>,
    block_events: Receiver<()>,
    output: Arc<dyn AudioOutput>,
    playing: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    idle: Arc<(Mutex<()>, Condvar)>,
) {
    while let Ok(job) = job_rx.recv() {
        let mut sent = 0usize;
        while sent < job.blocks {
            match block_events.recv_timeout(BLOCK_TIMEOUT) {
                Ok(()) => sent += 1,
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        "PlaybackEngine: no block notification after {} of {} blocks, tearing down",
                        sent,
                        job.blocks
                    );
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::error!("PlaybackEngine: block event channel closed");
                    break;
                }
            }

            if job.stoppable && stop_requested.load(Ordering::SeqCst) {
                tracing::info!(
                    "PlaybackEngine: stop honoured after {} of {} blocks",
                    sent,
                    job.blocks
                );
                break;
            }
        }

        if let Err(e) = output.stop() {
            tracing::error!("PlaybackEngine: failed to stop peripheral: {}", e);
        }

        // Stale notifications from an early-stopped transfer must not leak
        // into the next session's count
        while block_events.try_recv().is_ok() {}

        drop(job.samples);

        let (lock, cvar) = &*idle;
        let _guard = lock.lock();
        playing.store(false, Ordering::SeqCst);
        cvar.notify_all();
    }
}
