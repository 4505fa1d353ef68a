//! Touch pad calibration and event classification
//!
//! At boot each pad is sampled ~255 times and averaged into a baseline; the
//! trigger threshold is a fixed percentage of that baseline (capacitance
//! drops when a finger approaches, so readings at or below the threshold
//! are touches). The hardware threshold interrupt delivers a status
//! snapshot naming the pad that fired; the monitor thread classifies it,
//! emits one event per rising edge, cancels any stoppable in-flight audio,
//! and re-arms only after a debounce delay and a cleared reading.

use crossbeam_channel::{RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::audio::PlaybackEngine;
use crate::config::TouchConfig;
use crate::error::EngineError;
use crate::hal::{Pad, TouchPads};
use crate::input::InputEvent;

/// How often the monitor wakes to check for shutdown while idle
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Poll interval while waiting for a pad reading to clear
const REARM_POLL: Duration = Duration::from_millis(10);

/// Per-pad baseline and derived trigger threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchCalibration {
    pub baseline: u16,
    pub threshold: u16,
}

impl TouchCalibration {
    /// Whether a raw reading counts as a touch
    pub fn is_touched(&self, reading: u16) -> bool {
        reading <= self.threshold
    }
}

/// Sample a pad repeatedly and derive its calibration.
///
/// The threshold must end up strictly below the baseline, otherwise the
/// resting reading would trigger continuously; that indicates a hardware
/// fault and fails the boot.
pub fn calibrate_pad(
    pads: &dyn TouchPads,
    pad: Pad,
    config: &TouchConfig,
) -> Result<TouchCalibration, EngineError> {
    let samples = config.calibration_samples.max(1);
    let mut sum: u64 = 0;
    for _ in 0..samples {
        sum += u64::from(pads.read_raw(pad)?);
    }
    let baseline = (sum / u64::from(samples)) as u16;
    let threshold = (u32::from(baseline) * u32::from(config.threshold_percent) / 100) as u16;

    if threshold >= baseline {
        return Err(EngineError::HardwareIo(format!(
            "Touch calibration invalid for {:?}: threshold {} >= baseline {}",
            pad, threshold, baseline
        )));
    }

    tracing::info!(
        "Touch: {:?} calibrated, baseline {} threshold {}",
        pad,
        baseline,
        threshold
    );

    Ok(TouchCalibration {
        baseline,
        threshold,
    })
}

/// Monitor thread turning pad status interrupts into Forward/Backward events
pub struct TouchMonitor {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TouchMonitor {
    /// Calibrate both pads, arm the hardware thresholds and start the
    /// monitor thread.
    pub fn spawn(
        pads: Arc<dyn TouchPads>,
        engine: Arc<PlaybackEngine>,
        events: Sender<InputEvent>,
        config: TouchConfig,
    ) -> Result<Self, EngineError> {
        let forward = calibrate_pad(pads.as_ref(), Pad::Forward, &config)?;
        let backward = calibrate_pad(pads.as_ref(), Pad::Backward, &config)?;
        pads.set_threshold(Pad::Forward, forward.threshold)?;
        pads.set_threshold(Pad::Backward, backward.threshold)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = {
            let shutdown = shutdown.clone();
            std::thread::spawn(move || {
                monitor_loop(pads, engine, events, config, forward, backward, shutdown);
            })
        };

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }
}

impl Drop for TouchMonitor {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn monitor_loop(
    pads: Arc<dyn TouchPads>,
    engine: Arc<PlaybackEngine>,
    events: Sender<InputEvent>,
    config: TouchConfig,
    forward: TouchCalibration,
    backward: TouchCalibration,
    shutdown: Arc<AtomicBool>,
) {
    let status_events = pads.status_events();

    while !shutdown.load(Ordering::SeqCst) {
        let status = match status_events.recv_timeout(IDLE_POLL) {
            Ok(status) => status,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let (pad, calibration, event) = if status.forward {
            (Pad::Forward, forward, InputEvent::Forward)
        } else if status.backward {
            (Pad::Backward, backward, InputEvent::Backward)
        } else {
            continue;
        };

        // An observed touch cancels whatever stoppable clip is mid-flight
        if engine.is_playing() {
            engine.request_stop();
        }

        tracing::debug!("Touch: {:?} edge", pad);
        if events.send(event).is_err() {
            break;
        }

        // Debounce: wait out the contact, then require the reading to clear
        // above threshold before re-arming this pad
        std::thread::sleep(Duration::from_millis(config.debounce_ms));
        while !shutdown.load(Ordering::SeqCst) {
            match pads.read_raw(pad) {
                Ok(reading) if !calibration.is_touched(reading) => break,
                Ok(_) => std::thread::sleep(REARM_POLL),
                Err(e) => {
                    tracing::warn!("Touch: re-arm read failed for {:?}: {}", pad, e);
                    break;
                }
            }
        }

        // Drop interrupts that queued up while the pad was held
        while status_events.try_recv().is_ok() {}
    }

    tracing::debug!("Touch: monitor stopped");
}
