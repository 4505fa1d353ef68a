//! Audio playback: the engine owning the I2S peripheral and the voice cue
//! clip table.

pub mod clips;
pub mod engine;

pub use clips::{ClipStore, CueId};
pub use engine::{PlaybackEngine, BLOCK_SAMPLES, MIN_PADDED_SAMPLES, POP_GUARD_SAMPLES};

/// Sample rate of every clip the device plays (mono, signed 16-bit)
pub const SAMPLE_RATE_HZ: u32 = 16_000;
