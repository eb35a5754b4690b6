//! Error types for command decoding and configuration loading.

use std::path::PathBuf;

use thiserror::Error;

use crate::command::Field;

/// Reasons a command line can be refused.
///
/// None of these are fatal: the command is dropped, the actuators keep their
/// previous state and the control loop carries on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The component code is not one of `T`, `S` or `F`.
    #[error("Wrong component code '{0}'")]
    UnrecognizedComponent(String),

    /// The instruction code is neither `0` nor `1`.
    #[error("Wrong instruction code '{0}'")]
    UnrecognizedInstruction(String),

    /// The id field does not address one of the servos.
    #[error("Component #{0} is not a servo")]
    UnknownServoId(u32),

    /// The waveform code is not one of `S`, `C`, `T`, `I` or `N`.
    ///
    /// In a start command this is a warning: audio starts with the waveform
    /// already selected.
    #[error("Wrong waveform code '{0}'")]
    UnrecognizedWaveform(String),

    /// A numeric field held something other than decimal digits.
    ///
    /// Reported as a warning only; the field still parses (to its leading
    /// digits, or 0).
    #[error("Non-numeric content '{raw}' in {field} field")]
    MalformedNumericField { field: Field, raw: String },
}

/// Errors raised while loading a [`ControllerConfig`](crate::config::ControllerConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_servo_message_names_the_id() {
        let err = CommandError::UnknownServoId(9);
        assert_eq!(err.to_string(), "Component #9 is not a servo");
    }

    #[test]
    fn malformed_field_message_names_field_and_content() {
        let err = CommandError::MalformedNumericField {
            field: Field::Speed,
            raw: String::from("abcde"),
        };
        assert_eq!(err.to_string(), "Non-numeric content 'abcde' in speed field");
    }

    #[test]
    fn invalid_config_message() {
        let err = ConfigError::Invalid(String::from("servo.min_position must be below servo.max_position"));
        assert!(err.to_string().starts_with("Invalid configuration"));
    }
}
