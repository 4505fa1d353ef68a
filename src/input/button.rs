//! Home button press classification
//!
//! The GPIO ISR enqueues one token per falling edge and does nothing else.
//! The monitor thread runs a two-window classifier per press: it polls the
//! pin for up to `single_press_ticks` waiting for the release, then opens a
//! nested window of `double_press_ticks` waiting for a second press. A
//! second press classifies the pair as a double press; anything else is a
//! single press. Exactly one classification is in flight at a time.

use crossbeam_channel::{RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::ButtonConfig;
use crate::hal::ButtonPin;
use crate::input::InputEvent;

/// How often the monitor wakes to check for shutdown while idle
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Monitor thread classifying falling edges into single/double presses
pub struct ButtonMonitor {
    shutdown: Arc<AtomicBool>,
    busy: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ButtonMonitor {
    /// Start the monitor thread
    pub fn spawn(
        pin: Arc<dyn ButtonPin>,
        events: Sender<InputEvent>,
        config: ButtonConfig,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let busy = Arc::new(AtomicBool::new(false));

        let handle = {
            let shutdown = shutdown.clone();
            let busy = busy.clone();
            std::thread::spawn(move || {
                monitor_loop(pin, events, config, shutdown, busy);
            })
        };

        Self {
            shutdown,
            busy,
            handle: Some(handle),
        }
    }

    /// Whether a press is currently being classified
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

impl Drop for ButtonMonitor {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn monitor_loop(
    pin: Arc<dyn ButtonPin>,
    events: Sender<InputEvent>,
    config: ButtonConfig,
    shutdown: Arc<AtomicBool>,
    busy: Arc<AtomicBool>,
) {
    let edges = pin.edge_events();
    let tick = Duration::from_millis(config.tick_ms);

    while !shutdown.load(Ordering::SeqCst) {
        match edges.recv_timeout(IDLE_POLL) {
            Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }

        busy.store(true, Ordering::SeqCst);
        let event = classify_press(pin.as_ref(), &edges, &config, tick);

        // Edges raised by the second press of a double have already been
        // consumed by the classifier; drop any stragglers
        while edges.try_recv().is_ok() {}
        busy.store(false, Ordering::SeqCst);

        tracing::debug!("Button: classified {:?}", event);
        if events.send(event).is_err() {
            break;
        }
    }

    tracing::debug!("Button: monitor stopped");
}

/// Run the two press windows for one falling edge
fn classify_press(
    pin: &dyn ButtonPin,
    edges: &crossbeam_channel::Receiver<()>,
    config: &ButtonConfig,
    tick: Duration,
) -> InputEvent {
    for _ in 0..=config.single_press_ticks {
        std::thread::sleep(tick);
        if !pin.is_pressed() {
            // Released within the single-press window; wait for a re-press
            for _ in 0..=config.double_press_ticks {
                std::thread::sleep(tick);
                if pin.is_pressed() || edges.try_recv().is_ok() {
                    return InputEvent::DoublePress;
                }
            }
            return InputEvent::SinglePress;
        }
    }

    // Still held past the window; treat the long press as a single
    InputEvent::SinglePress
}
