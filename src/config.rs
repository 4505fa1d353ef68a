//! Configuration management for the orchestration engine
//!
//! Provides persistent settings storage with schema versioning and
//! migrations. Configuration is stored in `~/.tutorglass/config.json`;
//! missing files and unknown fields fall back to defaults so the device
//! always boots with a usable configuration.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::error::EngineError;

/// Current config schema version
const CURRENT_VERSION: u32 = 1;

/// Global config instance for caching
static CONFIG: OnceLock<RwLock<EngineConfig>> = OnceLock::new();

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Schema version for migrations
    pub version: u32,
    /// Audio playback settings
    pub audio: AudioConfig,
    /// Touch pad settings
    pub touch: TouchConfig,
    /// Home button settings
    pub button: ButtonConfig,
    /// Camera capture settings
    pub capture: CaptureConfig,
    /// Remote service settings
    pub network: NetworkConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            audio: AudioConfig::default(),
            touch: TouchConfig::default(),
            button: ButtonConfig::default(),
            capture: CaptureConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

/// Audio playback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Directory holding the voice cue WAV files (None for the default
    /// `clips` directory next to the binary)
    pub clip_dir: Option<PathBuf>,
    /// Gain applied to downloaded answer audio; cue gains come from the
    /// clip table
    pub answer_gain: f32,
    /// Ticks to wait for a replay request after the answer has played
    pub answer_repeat_window_ticks: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            clip_dir: None,
            answer_gain: 0.2,
            answer_repeat_window_ticks: 500,
        }
    }
}

/// Touch pad configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TouchConfig {
    /// Number of raw readings averaged into the per-pad baseline
    pub calibration_samples: u32,
    /// Threshold as a percentage of the baseline; must stay below 100 so
    /// the resting reading is non-triggering
    pub threshold_percent: u16,
    /// Delay after an accepted edge before re-arm polling begins
    pub debounce_ms: u64,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            calibration_samples: 255,
            threshold_percent: 98,
            debounce_ms: 250,
        }
    }
}

/// Home button configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ButtonConfig {
    /// Poll interval for the press windows, in milliseconds
    pub tick_ms: u64,
    /// Ticks to wait for the release that ends a single press
    pub single_press_ticks: u32,
    /// Ticks after release in which a second press classifies as a double
    pub double_press_ticks: u32,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            tick_ms: 10,
            single_press_ticks: 5,
            double_press_ticks: 70,
        }
    }
}

/// Camera capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Frames discarded before the kept capture while the sensor settles
    pub warmup_frames: u32,
    /// Capture attempts per visit before the device restarts with the
    /// adjusted encoder settings
    pub retry_limit: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            warmup_frames: 5,
            retry_limit: 3,
        }
    }
}

/// Remote service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Base URL of the tutoring service
    pub base_url: String,
    /// Session validation attempts before giving up on a submission
    pub validate_retry_limit: u32,
    /// Question-status polls before giving up on a submission
    pub db_poll_limit: u32,
    /// Wait between question-status polls, in milliseconds
    pub poll_wait_ms: u64,
    /// Answer download attempts before giving up
    pub download_retry_limit: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_url: "https://app.tutorfish.com".to_string(),
            validate_retry_limit: 3,
            db_poll_limit: 10,
            poll_wait_ms: 3000,
            download_retry_limit: 3,
        }
    }
}

/// Get the path to the config file (~/.tutorglass/config.json)
pub fn get_config_path() -> PathBuf {
    get_config_dir().join("config.json")
}

/// Get the path to the config directory (~/.tutorglass)
fn get_config_dir() -> PathBuf {
    home_dir_or_fallback().join(".tutorglass")
}

/// Get the home directory, falling back to /tmp if unavailable
fn home_dir_or_fallback() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        tracing::error!("Could not determine home directory, using /tmp");
        PathBuf::from("/tmp")
    })
}

/// Ensure the config directory exists
fn ensure_config_dir() -> Result<(), EngineError> {
    let dir = get_config_dir();
    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| {
            EngineError::Persistence(format!("Failed to create config directory: {}", e))
        })?;
    }
    Ok(())
}

/// Load configuration from disk
fn load_from_disk() -> Result<EngineConfig, EngineError> {
    let path = get_config_path();

    if !path.exists() {
        tracing::info!("Config file not found, using defaults");
        return Ok(EngineConfig::default());
    }

    let contents = fs::read_to_string(&path)
        .map_err(|e| EngineError::Persistence(format!("Failed to read config file: {}", e)))?;

    let config: EngineConfig = serde_json::from_str(&contents)
        .map_err(|e| EngineError::Persistence(format!("Failed to parse config: {}", e)))?;

    // Run migrations if needed
    let migrated = migrate_config(config)?;

    Ok(migrated)
}

/// Save configuration to disk
fn save_to_disk(config: &EngineConfig) -> Result<(), EngineError> {
    ensure_config_dir()?;

    let path = get_config_path();
    let contents = serde_json::to_string_pretty(config)
        .map_err(|e| EngineError::Persistence(format!("Failed to serialise config: {}", e)))?;

    fs::write(&path, contents)
        .map_err(|e| EngineError::Persistence(format!("Failed to write config file: {}", e)))?;

    tracing::info!("Config saved to disk");
    Ok(())
}

/// Migrate configuration from older schema versions
fn migrate_config(mut config: EngineConfig) -> Result<EngineConfig, EngineError> {
    let original_version = config.version;

    // Apply migrations sequentially
    while config.version < CURRENT_VERSION {
        config = apply_migration(config)?;
    }

    if config.version != original_version {
        tracing::info!(
            "Migrated config from version {} to {}",
            original_version,
            config.version
        );
        // Save the migrated config
        save_to_disk(&config)?;
    }

    Ok(config)
}

/// Apply a single migration step
fn apply_migration(config: EngineConfig) -> Result<EngineConfig, EngineError> {
    match config.version {
        // Version 0 -> 1: initial schema
        0 => {
            let mut migrated = config;
            migrated.version = 1;
            Ok(migrated)
        }
        v => Err(EngineError::Persistence(format!(
            "Unknown config version: {}",
            v
        ))),
    }
}

/// Get the global config instance
fn get_config_instance() -> &'static RwLock<EngineConfig> {
    CONFIG.get_or_init(|| {
        let config = load_from_disk().unwrap_or_else(|e| {
            tracing::error!("Failed to load config, using defaults: {}", e);
            EngineConfig::default()
        });
        tracing::info!("Config loaded (schema version {})", config.version);
        RwLock::new(config)
    })
}

/// Get the current configuration
///
/// The config is cached in memory and loaded from disk on first access.
pub fn get_config() -> EngineConfig {
    get_config_instance().read().clone()
}

/// Update the configuration
///
/// Replaces the current configuration with the provided config and persists
/// it to disk. The version field is forced to the current schema.
pub fn set_config(mut config: EngineConfig) -> Result<(), EngineError> {
    config.version = CURRENT_VERSION;

    // Save to disk first
    save_to_disk(&config)?;

    // Update cached config
    let mut cached = get_config_instance().write();
    *cached = config;

    tracing::info!("Configuration updated");
    Ok(())
}

/// Reset configuration to defaults
pub fn reset_config() -> Result<EngineConfig, EngineError> {
    let config = EngineConfig::default();
    save_to_disk(&config)?;

    let mut cached = get_config_instance().write();
    *cached = config.clone();

    tracing::info!("Configuration reset to defaults");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_current_version() {
        let config = EngineConfig::default();
        assert_eq!(config.version, CURRENT_VERSION);
    }

    #[test]
    fn test_default_touch_threshold_below_hundred() {
        let config = TouchConfig::default();
        assert!(config.threshold_percent < 100);
        assert_eq!(config.calibration_samples, 255);
    }

    #[test]
    fn test_default_button_windows() {
        let config = ButtonConfig::default();
        assert_eq!(config.single_press_ticks, 5);
        assert_eq!(config.double_press_ticks, 70);
        assert_eq!(config.tick_ms, 10);
    }

    #[test]
    fn test_config_round_trip_serialisation() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.version, config.version);
        assert_eq!(parsed.network.db_poll_limit, config.network.db_poll_limit);
        assert_eq!(parsed.touch.threshold_percent, config.touch.threshold_percent);
    }

    #[test]
    fn test_unknown_fields_fall_back_to_defaults() {
        // An older or hand-edited file missing whole sections still parses
        let json = r#"{ "version": 1, "audio": { "answer_gain": 0.5 } }"#;
        let parsed: EngineConfig = serde_json::from_str(json).unwrap();
        assert!((parsed.audio.answer_gain - 0.5).abs() < f32::EPSILON);
        assert_eq!(parsed.button.single_press_ticks, 5);
        assert_eq!(parsed.capture.warmup_frames, 5);
    }

    #[test]
    fn test_migration_from_version_zero() {
        let mut config = EngineConfig::default();
        config.version = 0;
        let migrated = apply_migration(config).unwrap();
        assert_eq!(migrated.version, 1);
    }

    #[test]
    fn test_migration_rejects_unknown_version() {
        let mut config = EngineConfig::default();
        config.version = 99;
        // migrate_config only runs forward; apply_migration must reject
        assert!(apply_migration(config).is_err());
    }
}
