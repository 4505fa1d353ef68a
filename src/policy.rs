//! Capture quality adaptation
//!
//! The JPEG encoder quality parameter is derived from a small exponent that
//! moves with capture outcomes: a failed capture raises it one step, a
//! successful capture lowers it one step. The exponent is persisted after
//! every change so the adapted setting survives the device restart that
//! re-applies camera configuration. At the ceiling a further failure is
//! reported as a lighting problem instead of another adjustment.

use crate::hal::NvsStore;

/// NVS key holding the persisted exponent
pub const EXPONENT_KEY: &str = "jpeg_exponent";

/// Inclusive upper bound of the exponent
pub const EXPONENT_CEILING: u8 = 5;

/// Encoder quality at exponent zero
pub const BASE_QUALITY: f32 = 6.0;

/// Multiplier applied per exponent step
pub const GROWTH_RATE: f32 = 1.33;

/// Outcome of recording a failed capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureVerdict {
    /// The exponent moved; retry with the new encoder setting
    Adjusted,
    /// Already at the ceiling; the scene needs more light
    NeedsBetterLighting,
}

/// The adaptive quality policy; exponent stays within `[0, EXPONENT_CEILING]`
#[derive(Debug)]
pub struct CaptureQualityPolicy {
    exponent: u8,
}

impl CaptureQualityPolicy {
    /// Load the persisted exponent, defaulting to zero when the store has
    /// no value or fails (persistence failures never block a capture).
    pub fn load(nvs: &dyn NvsStore) -> Self {
        let exponent = match nvs.read_u8(EXPONENT_KEY) {
            Ok(Some(value)) => value.min(EXPONENT_CEILING),
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!("Policy: failed to read exponent, defaulting to 0: {}", e);
                0
            }
        };
        tracing::info!("Policy: capture quality exponent {}", exponent);
        Self { exponent }
    }

    /// Current exponent
    pub fn exponent(&self) -> u8 {
        self.exponent
    }

    /// Encoder quality parameter for the current exponent
    pub fn quality(&self) -> u8 {
        (BASE_QUALITY * GROWTH_RATE.powi(i32::from(self.exponent))).round() as u8
    }

    /// A capture succeeded; step the exponent back towards zero
    pub fn record_success(&mut self, nvs: &dyn NvsStore) {
        if self.exponent > 0 {
            self.exponent -= 1;
            self.persist(nvs);
        }
    }

    /// A capture failed; step the exponent up, or report a lighting problem
    /// when it is already at the ceiling.
    pub fn record_failure(&mut self, nvs: &dyn NvsStore) -> CaptureVerdict {
        if self.exponent < EXPONENT_CEILING {
            self.exponent += 1;
            self.persist(nvs);
            CaptureVerdict::Adjusted
        } else {
            CaptureVerdict::NeedsBetterLighting
        }
    }

    fn persist(&self, nvs: &dyn NvsStore) {
        if let Err(e) = nvs.write_u8(EXPONENT_KEY, self.exponent) {
            tracing::warn!("Policy: failed to persist exponent {}: {}", self.exponent, e);
        } else {
            tracing::debug!(
                "Policy: exponent {} persisted (quality {})",
                self.exponent,
                self.quality()
            );
        }
    }
}
