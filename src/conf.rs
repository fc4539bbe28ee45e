// Engine configuration
//
// Persisted as JSON under the user config directory. Missing fields fall
// back to their defaults so older files keep loading.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::sequencer::clock::DEFAULT_SAMPLE_RATE;

pub const CONFIG_DIR_NAME: &str = "loop_engine";
pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What starts an input recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecTriggerMode {
    /// Start immediately
    #[default]
    Normal,
    /// Wait for the input to cross the trigger level
    Signal,
}

/// Length policy of an input take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputRecMode {
    /// One loop long, wraps
    #[default]
    Rigid,
    /// Free length; the loop is resized to fit the take
    Free,
}

/// Outgoing MIDI synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    None,
    /// MIDI clock, 24 pulses per quarter note
    ClockMaster,
    /// MIDI time code quarter frames
    MtcMaster,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub buffer_size: u32,
    pub input_enabled: bool,
    pub limit_output: bool,
    pub rec_trigger_mode: RecTriggerMode,
    /// dBFS
    pub rec_trigger_level: f32,
    pub input_rec_mode: InputRecMode,
    pub midi_sync: SyncMode,
    /// MTC frames per second
    pub midi_tc_fps: f32,
    pub chans_stop_on_seq_halt: bool,
    pub treat_recs_as_loops: bool,
    /// Frames a rescaled action may be pulled forward onto a step boundary
    pub rescale_snap_tolerance: usize,
    pub dispatcher_rate_ms: u64,
    pub metronome_volume: f32,
    pub midi_in_port: Option<String>,
    pub midi_out_port: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_size: 512,
            input_enabled: false,
            limit_output: false,
            rec_trigger_mode: RecTriggerMode::Normal,
            rec_trigger_level: -10.0,
            input_rec_mode: InputRecMode::Rigid,
            midi_sync: SyncMode::None,
            midi_tc_fps: 25.0,
            chans_stop_on_seq_halt: false,
            treat_recs_as_loops: false,
            rescale_snap_tolerance: 6,
            dispatcher_rate_ms: 5,
            metronome_volume: 0.8,
            midi_in_port: None,
            midi_out_port: None,
        }
    }
}

impl EngineConfig {
    /// `<config dir>/loop_engine/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        info!("[conf] loaded {}", path.display());
        Ok(config)
    }

    /// Defaults when the file is missing or unreadable
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("[conf] {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(8_000..=384_000).contains(&self.sample_rate) {
            return Err(ConfigError::Invalid(format!(
                "sample_rate {} out of range",
                self.sample_rate
            )));
        }
        if self.buffer_size == 0 || self.buffer_size > 8192 {
            return Err(ConfigError::Invalid(format!(
                "buffer_size {} out of range",
                self.buffer_size
            )));
        }
        if self.rec_trigger_level > 0.0 {
            return Err(ConfigError::Invalid(
                "rec_trigger_level must be <= 0 dBFS".to_string(),
            ));
        }
        if self.midi_tc_fps <= 0.0 {
            return Err(ConfigError::Invalid("midi_tc_fps must be > 0".to_string()));
        }
        if self.dispatcher_rate_ms == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher_rate_ms must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.metronome_volume) {
            return Err(ConfigError::Invalid(
                "metronome_volume must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let config = EngineConfig {
            sample_rate: 48000,
            midi_sync: SyncMode::MtcMaster,
            rec_trigger_mode: RecTriggerMode::Signal,
            ..EngineConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, r#"{ "sample_rate": 48000, "midi_sync": "clock_master" }"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.midi_sync, SyncMode::ClockMaster);
        assert_eq!(config.rescale_snap_tolerance, 6);
    }

    #[test]
    fn test_invalid_rejected() {
        let config = EngineConfig {
            buffer_size: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_or_default_on_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "not json").unwrap();
        assert_eq!(EngineConfig::load_or_default(&path), EngineConfig::default());
    }
}
