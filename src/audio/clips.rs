//! Voice cue clip table
//!
//! Every spoken prompt the device plays is described by one row of a static
//! table: where the samples come from, the default gain, and whether a touch
//! may cut the clip short. Clips are loaded through a single generic path
//! and cached after first use; the table is static, so caching is safe.
//!
//! File-backed clips are 16 kHz mono 16-bit WAV on the audio filesystem.
//! Tone clips stand in for the short beeps compiled into firmware.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::audio::SAMPLE_RATE_HZ;
use crate::error::EngineError;

/// Identifier for every voice cue the state machine can play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CueId {
    /// Played once at boot
    Welcome,
    /// Home menu usage instructions
    HomeInstructions,
    /// Reminder that sleeping conserves battery
    ConserveBattery,
    /// Menu browse: settings entry
    TutorSettings,
    /// Menu browse: submit-question entry
    SubmitAQuestion,
    /// Wi-Fi connection attempt started
    AttemptWifiConn,
    /// Wi-Fi connection failed or was torn down
    WifiDisconnected,
    /// Leaving the current screen for the home menu
    ReturningHome,
    /// Ask the user to look at their question
    LookAtQuestion,
    /// Short shutter beep once the frame is kept
    CaptureBeep,
    /// Question accepted by the service
    QuestionSubmitted,
    /// Waiting for a tutor to answer
    PleaseWait,
    /// Offer to replay the answer
    RepeatAnswer,
    /// Capture keeps failing at the darkest encoder setting
    NeedsBetterLighting,
    /// Submission failed; returning to sleep
    SubmissionProblem,
}

/// Where a clip's samples come from
#[derive(Debug, Clone, Copy)]
enum ClipSource {
    /// WAV file on the audio filesystem
    File(&'static str),
    /// Sine tone synthesized at load time
    Tone { freq_hz: f32, ms: u32 },
}

/// One row of the clip table
#[derive(Debug, Clone, Copy)]
pub struct ClipSpec {
    source: ClipSource,
    /// Default gain used when the state machine plays this cue
    pub gain: f32,
    /// Whether a touch-initiated stop may cut this cue short
    pub stoppable: bool,
}

impl CueId {
    /// The table entry for this cue
    pub fn spec(self) -> ClipSpec {
        use ClipSource::{File, Tone};
        match self {
            // The welcome and teardown prompts always play in full
            CueId::Welcome => clip(File("welcome_00.wav"), 0.2, false),
            CueId::HomeInstructions => clip(File("home_instructions_00.wav"), 0.2, true),
            CueId::ConserveBattery => clip(File("conserve_battery_00.wav"), 0.2, true),
            CueId::TutorSettings => clip(File("tutor_settings_00.wav"), 0.2, true),
            CueId::SubmitAQuestion => clip(File("submit_a_question_00.wav"), 0.2, true),
            CueId::AttemptWifiConn => clip(File("attempt_wifi_conn_00.wav"), 0.2, false),
            CueId::WifiDisconnected => clip(File("wifi_disconnected_00.wav"), 0.2, false),
            CueId::ReturningHome => clip(File("returning_home_00.wav"), 0.2, false),
            CueId::LookAtQuestion => clip(File("look_at_question_00.wav"), 0.2, false),
            CueId::CaptureBeep => clip(Tone { freq_hz: 1200.0, ms: 120 }, 0.15, false),
            CueId::QuestionSubmitted => clip(File("question_submitted_00.wav"), 0.2, false),
            CueId::PleaseWait => clip(File("please_wait_00.wav"), 0.2, true),
            CueId::RepeatAnswer => clip(File("repeat_answer_00.wav"), 0.2, true),
            CueId::NeedsBetterLighting => clip(File("needs_better_lighting_00.wav"), 0.2, false),
            CueId::SubmissionProblem => clip(Tone { freq_hz: 440.0, ms: 350 }, 0.15, false),
        }
    }
}

const fn clip(source: ClipSource, gain: f32, stoppable: bool) -> ClipSpec {
    ClipSpec {
        source,
        gain,
        stoppable,
    }
}

/// Loads and caches clip sample buffers
pub struct ClipStore {
    dir: PathBuf,
    cache: RwLock<HashMap<CueId, Arc<Vec<i16>>>>,
}

impl ClipStore {
    /// Create a store reading file-backed clips from `dir`
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Load a cue's samples, hitting the cache after first use
    pub fn load(&self, cue: CueId) -> Result<Arc<Vec<i16>>, EngineError> {
        if let Some(samples) = self.cache.read().get(&cue) {
            return Ok(samples.clone());
        }

        let samples = Arc::new(self.load_uncached(cue)?);
        self.cache.write().insert(cue, samples.clone());
        Ok(samples)
    }

    /// Drop a cue's cached samples
    pub fn unload(&self, cue: CueId) {
        self.cache.write().remove(&cue);
    }

    fn load_uncached(&self, cue: CueId) -> Result<Vec<i16>, EngineError> {
        match cue.spec().source {
            ClipSource::File(name) => {
                let path = self.dir.join(name);
                let mut reader = hound::WavReader::open(&path).map_err(|e| {
                    EngineError::Allocation(format!(
                        "Failed to open clip {}: {}",
                        path.display(),
                        e
                    ))
                })?;

                let spec = reader.spec();
                if spec.channels != 1 || spec.sample_rate != SAMPLE_RATE_HZ {
                    tracing::warn!(
                        "ClipStore: {} is {} ch @ {} Hz, expected mono @ {} Hz",
                        name,
                        spec.channels,
                        spec.sample_rate,
                        SAMPLE_RATE_HZ
                    );
                }

                let samples: Result<Vec<i16>, _> = reader.samples::<i16>().collect();
                let samples = samples.map_err(|e| {
                    EngineError::Allocation(format!("Failed to decode clip {}: {}", name, e))
                })?;

                tracing::debug!("ClipStore: loaded {} ({} samples)", name, samples.len());
                Ok(samples)
            }
            ClipSource::Tone { freq_hz, ms } => Ok(synthesize_tone(freq_hz, ms)),
        }
    }
}

/// Generate a sine tone at the device sample rate
fn synthesize_tone(freq_hz: f32, ms: u32) -> Vec<i16> {
    let len = (SAMPLE_RATE_HZ * ms / 1000) as usize;
    let step = std::f32::consts::TAU * freq_hz / SAMPLE_RATE_HZ as f32;
    (0..len)
        .map(|i| ((i as f32 * step).sin() * f32::from(i16::MAX) * 0.8) as i16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use tempfile::TempDir;

    fn write_test_wav(dir: &TempDir, name: &str, samples: &[i16]) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE_HZ,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(dir.path().join(name), spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_file_clip_loads_and_caches() {
        let dir = TempDir::new().unwrap();
        write_test_wav(&dir, "welcome_00.wav", &[1, -2, 3, -4]);

        let store = ClipStore::new(dir.path().to_path_buf());
        let first = store.load(CueId::Welcome).unwrap();
        assert_eq!(*first, vec![1, -2, 3, -4]);

        // Remove the file; a cached load must still succeed
        std::fs::remove_file(dir.path().join("welcome_00.wav")).unwrap();
        let second = store.load(CueId::Welcome).unwrap();
        assert_eq!(*second, vec![1, -2, 3, -4]);

        // After unload the missing file is an error again
        store.unload(CueId::Welcome);
        assert!(store.load(CueId::Welcome).is_err());
    }

    #[test]
    fn test_missing_file_is_an_allocation_error() {
        let dir = TempDir::new().unwrap();
        let store = ClipStore::new(dir.path().to_path_buf());
        assert!(matches!(
            store.load(CueId::ReturningHome),
            Err(EngineError::Allocation(_))
        ));
    }

    #[test]
    fn test_tone_clip_needs_no_file() {
        let dir = TempDir::new().unwrap();
        let store = ClipStore::new(dir.path().to_path_buf());
        let samples = store.load(CueId::CaptureBeep).unwrap();
        // 120 ms at 16 kHz
        assert_eq!(samples.len(), 1920);
        assert!(samples.iter().any(|&s| s != 0));
    }

    #[test]
    fn test_non_stoppable_cues_stay_non_stoppable() {
        // Prompts that orient the user must always play in full
        assert!(!CueId::Welcome.spec().stoppable);
        assert!(!CueId::AttemptWifiConn.spec().stoppable);
        assert!(CueId::PleaseWait.spec().stoppable);
    }
}
