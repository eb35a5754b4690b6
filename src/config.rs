//! Controller configuration, loaded from TOML.
//!
//! Every section and key is optional; anything missing takes the default of
//! the stock shield wiring.
//!
//! ```toml
//! [servo]
//! min_position = 65
//! max_position = 180
//!
//! [audio]
//! sample_rate = 16384
//!
//! [serial]
//! port = "/dev/ttyACM0"
//! baud_rate = 115200
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoLimits {
    pub min_position: i32,
    pub max_position: i32,
    pub min_interval_ms: u32,
    pub max_interval_ms: u32,
    pub min_speed: u32,
    pub max_speed: u32,
}

impl Default for ServoLimits {
    fn default() -> Self {
        Self {
            min_position: 65,
            max_position: 180,
            min_interval_ms: 10,
            max_interval_ms: 200,
            min_speed: 1,
            max_speed: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanLimits {
    pub max_speed: u32,
}

impl Default for FanLimits {
    fn default() -> Self {
        Self { max_speed: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Samples per second rendered while audio is playing.
    pub sample_rate: u32,
    /// Seed of the noise wavetable.
    pub noise_seed: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_384,
            noise_seed: 0x5eed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: Option<String>,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Pause between two control cycles.
    pub cycle_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { cycle_ms: 1 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub servo: ServoLimits,
    pub fan: FanLimits,
    pub audio: AudioConfig,
    pub serial: SerialConfig,
    pub control: ControlConfig,
}

impl ControllerConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let servo = &self.servo;
        if servo.min_position >= servo.max_position {
            return Err(ConfigError::Invalid(
                "servo.min_position must be below servo.max_position".into(),
            ));
        }
        if servo.min_interval_ms > servo.max_interval_ms {
            return Err(ConfigError::Invalid(
                "servo.min_interval_ms must not exceed servo.max_interval_ms".into(),
            ));
        }
        if servo.min_speed >= servo.max_speed {
            return Err(ConfigError::Invalid(
                "servo.min_speed must be below servo.max_speed".into(),
            ));
        }
        if self.fan.max_speed == 0 {
            return Err(ConfigError::Invalid("fan.max_speed must be positive".into()));
        }
        if self.audio.sample_rate == 0 {
            return Err(ConfigError::Invalid("audio.sample_rate must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_gives_defaults() {
        let config = ControllerConfig::from_toml("").unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.servo.min_position, 65);
        assert_eq!(config.serial.baud_rate, 115_200);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = ControllerConfig::from_toml(
            "[servo]\nmax_position = 170\n\n[serial]\nport = \"/dev/ttyACM0\"\n",
        )
        .unwrap();
        assert_eq!(config.servo.max_position, 170);
        assert_eq!(config.servo.min_position, 65);
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.audio, AudioConfig::default());
    }

    #[test]
    fn inverted_ranges_are_rejected() {
        let result = ControllerConfig::from_toml("[servo]\nmin_position = 190\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = ControllerConfig::from_toml("[audio]\nsample_rate = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        let result = ControllerConfig::from_toml("[servo\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[fan]\nmax_speed = 50").unwrap();
        let config = ControllerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.fan.max_speed, 50);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = ControllerConfig::from_file(Path::new("/nonexistent/shield.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn round_trips_through_toml() {
        let config = ControllerConfig::default();
        let text = toml::to_string(&config).unwrap();
        assert_eq!(ControllerConfig::from_toml(&text).unwrap(), config);
    }
}
