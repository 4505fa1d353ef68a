//! Input event sources: touch pads and the home button
//!
//! Each source runs its own monitor thread, turns raw hardware signals into
//! semantic events and sends them to the orchestration loop over a shared
//! channel. ISRs only flag and enqueue; every classification decision is
//! made in task context.

pub mod button;
pub mod touch;

pub use button::ButtonMonitor;
pub use touch::{calibrate_pad, TouchCalibration, TouchMonitor};

/// Semantic input events consumed by the orchestration loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Forward touch pad crossed its threshold
    Forward,
    /// Backward touch pad crossed its threshold
    Backward,
    /// Home button pressed and released once
    SinglePress,
    /// Home button pressed twice within the double-press window
    DoublePress,
}
