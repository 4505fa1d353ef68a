//! Status LED control
//!
//! The LED blinks while the device is working on a network exchange and
//! goes solid once Wi-Fi is up. The blink runs on its own thread; it must
//! be stopped before sleep entry so no task is left toggling a pin across
//! sleep/wake cycles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::hal::StatusLed;

/// Blink half-period
const BLINK_INTERVAL: Duration = Duration::from_millis(250);

struct BlinkTask {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owns the LED pin and at most one blink task
pub struct LedController {
    led: Arc<dyn StatusLed>,
    blink: Option<BlinkTask>,
}

impl LedController {
    pub fn new(led: Arc<dyn StatusLed>) -> Self {
        Self { led, blink: None }
    }

    /// Start blinking; a no-op if a blink task is already running
    pub fn start_blink(&mut self) {
        if self.blink.is_some() {
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let led = self.led.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut on = false;
                while !stop.load(Ordering::SeqCst) {
                    on = !on;
                    led.set(on);
                    std::thread::sleep(BLINK_INTERVAL);
                }
                led.set(false);
            })
        };
        self.blink = Some(BlinkTask { stop, handle });
        tracing::debug!("Led: blink started");
    }

    /// Stop any blink task and leave the LED in the given steady state
    pub fn set_steady(&mut self, on: bool) {
        if let Some(task) = self.blink.take() {
            task.stop.store(true, Ordering::SeqCst);
            if task.handle.join().is_err() {
                tracing::error!("Led: blink task panicked");
            }
        }
        self.led.set(on);
    }

    /// Stop blinking and turn the LED off; required before sleep entry
    pub fn off(&mut self) {
        self.set_steady(false);
    }
}

impl Drop for LedController {
    fn drop(&mut self) {
        self.off();
    }
}
