//! Fixed-width command decoding.
//!
//! A command is a single ASCII line whose fields sit at fixed character
//! offsets, whatever the component:
//!
//! ```text
//! offset: 0  2  4  6     12 14
//! field:  C  ID IN SPEED WV RHYTHM
//! ```
//!
//! Decoding happens once per line: [`Frame`] slices the fields, and
//! [`Command::decode`] turns the subset relevant to the component into typed
//! values.

use std::fmt;
use std::ops::Range;

use crate::audio::Waveform;
use crate::error::CommandError;
use crate::servo::ServoId;

/// Total width of a well-formed command.
pub const COMMAND_LEN: usize = 19;

/// The named fields of a command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Component,
    Id,
    Instruction,
    Speed,
    Waveform,
    Rhythm,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Component,
        Field::Id,
        Field::Instruction,
        Field::Speed,
        Field::Waveform,
        Field::Rhythm,
    ];

    /// Character range of the field within a command line.
    pub const fn range(self) -> Range<usize> {
        match self {
            Field::Component => 0..1,
            Field::Id => 2..3,
            Field::Instruction => 4..5,
            Field::Speed => 6..11,
            Field::Waveform => 12..13,
            Field::Rhythm => 14..19,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Field::Component => "component",
            Field::Id => "id",
            Field::Instruction => "instruction",
            Field::Speed => "speed",
            Field::Waveform => "waveform",
            Field::Rhythm => "rhythm",
        })
    }
}

/// Returns the characters of `field` within `command`.
///
/// Offsets count characters, not bytes. A command shorter than the field's
/// range is clamped to what is available, so a truncated line yields a
/// shortened or empty slice instead of a failure.
pub fn extract(command: &str, field: Field) -> &str {
    let range = field.range();
    let start = byte_offset(command, range.start);
    let end = byte_offset(command, range.end);
    &command[start..end]
}

fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map_or(s.len(), |(i, _)| i)
}

/// Result of reading a numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Numeric {
    pub value: u32,
    /// Set when the field held anything besides surrounding blanks and digits.
    pub malformed: bool,
}

/// Parses a decimal field the forgiving way: surrounding blanks are ignored,
/// the leading run of digits is the value (0 if there is none) and anything
/// else only marks the field as malformed.
pub fn parse_numeric(raw: &str) -> Numeric {
    let trimmed = raw.trim();
    let digits = trimmed.bytes().take_while(u8::is_ascii_digit).count();
    let value = trimmed.as_bytes()[..digits].iter().fold(0u32, |acc, b| {
        acc.saturating_mul(10).saturating_add(u32::from(b - b'0'))
    });

    Numeric {
        value,
        malformed: digits != trimmed.len(),
    }
}

/// Which actuator family a command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Transistor,
    Servo,
    Fan,
}

impl TryFrom<&str> for Component {
    type Error = CommandError;

    fn try_from(code: &str) -> Result<Self, Self::Error> {
        match code {
            "T" => Ok(Component::Transistor),
            "S" => Ok(Component::Servo),
            "F" => Ok(Component::Fan),
            other => Err(CommandError::UnrecognizedComponent(other.to_string())),
        }
    }
}

/// On/off flag carried by every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Off,
    On,
}

impl TryFrom<&str> for Instruction {
    type Error = CommandError;

    fn try_from(code: &str) -> Result<Self, Self::Error> {
        match code {
            "0" => Ok(Instruction::Off),
            "1" => Ok(Instruction::On),
            other => Err(CommandError::UnrecognizedInstruction(other.to_string())),
        }
    }
}

/// A command line split into its raw fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    line: &'a str,
}

impl<'a> Frame<'a> {
    pub fn new(line: &'a str) -> Self {
        Self { line }
    }

    pub fn line(&self) -> &'a str {
        self.line
    }

    pub fn field(&self, field: Field) -> &'a str {
        extract(self.line, field)
    }

    /// The reserved rhythm field. No handler reads it yet.
    pub fn rhythm(&self) -> &'a str {
        self.field(Field::Rhythm)
    }

    /// Reads a numeric field, recording a warning if it was not clean digits.
    fn numeric(&self, field: Field, warnings: &mut Vec<CommandError>) -> u32 {
        let raw = self.field(field);
        let parsed = parse_numeric(raw);
        if parsed.malformed {
            warnings.push(CommandError::MalformedNumericField {
                field,
                raw: raw.to_string(),
            });
        }
        parsed.value
    }
}

/// A fully decoded command, ready to be applied to the actuators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Halt audio generation; the selected waveform is kept.
    StopAudio,
    /// Tune every oscillator to `frequency` and play. `None` keeps the
    /// waveform already selected.
    StartAudio { waveform: Option<Waveform>, frequency: u32 },
    /// Enable or disable a servo sweep. `speed` is the raw 1..=100 magnitude.
    Servo { id: ServoId, enabled: bool, speed: u32 },
    /// Set the fan speed, 0..=100.
    Fan { speed: u32 },
}

/// A decoded command plus the non-fatal problems met while decoding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub command: Command,
    pub warnings: Vec<CommandError>,
}

impl Command {
    /// Decodes a command line.
    ///
    /// Only the fields used by the addressed component are read. Any error
    /// means the whole command must be dropped. An unknown waveform code in a
    /// start command is only a warning: the start still goes ahead with the
    /// previous waveform.
    pub fn decode(line: &str) -> Result<Decoded, CommandError> {
        let frame = Frame::new(line);
        let mut warnings = Vec::new();

        let command = match Component::try_from(frame.field(Field::Component))? {
            Component::Transistor => {
                match Instruction::try_from(frame.field(Field::Instruction))? {
                    Instruction::Off => Command::StopAudio,
                    Instruction::On => {
                        let waveform = Waveform::try_from(frame.field(Field::Waveform))
                            .map_err(|e| warnings.push(e))
                            .ok();
                        let frequency = frame.numeric(Field::Speed, &mut warnings);
                        Command::StartAudio {
                            waveform,
                            frequency,
                        }
                    }
                }
            }
            Component::Servo => {
                let raw_id = frame.numeric(Field::Id, &mut warnings);
                let id = ServoId::try_from(raw_id)?;
                // Anything but an explicit "1" switches the servo off.
                let enabled = frame.field(Field::Instruction) == "1";
                let speed = frame.numeric(Field::Speed, &mut warnings);
                Command::Servo { id, enabled, speed }
            }
            Component::Fan => Command::Fan {
                speed: frame.numeric(Field::Speed, &mut warnings),
            },
        };

        Ok(Decoded { command, warnings })
    }
}
