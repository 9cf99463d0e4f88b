use chrono::{DateTime, Local};
use std::fmt;

/// Marker the firmware prefixes sensor answers with.
pub const SENSOR_MARKER: &str = "SENSOR_VALUE:";

// Single byte commands understood by the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    GetValue,
    LightOn,
    LightOff,
    StreamStart,
}

impl Command {
    pub const ALL: [Command; 4] = [
        Command::GetValue,
        Command::LightOn,
        Command::LightOff,
        Command::StreamStart,
    ];

    pub fn encode(self) -> u8 {
        match self {
            Command::GetValue => b'p',
            Command::LightOn => b'u',
            Command::LightOff => b'd',
            Command::StreamStart => b's',
        }
    }

    pub fn decode(byte: u8) -> Option<Command> {
        Self::ALL.into_iter().find(|command| command.encode() == byte)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Command::GetValue => "GET_VALUE",
            Command::LightOn => "LIGHT_ON",
            Command::LightOff => "LIGHT_OFF",
            Command::StreamStart => "STREAM_START",
        };
        write!(f, "{}", name)
    }
}

// Sensor value decoded from one device line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LuminosityReading {
    pub value: i64,
    pub acquired_at: DateTime<Local>,
}

impl LuminosityReading {
    pub fn new(value: i64) -> Self {
        Self {
            value,
            acquired_at: Local::now(),
        }
    }
}

impl fmt::Display for LuminosityReading {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} @ {}",
            self.value,
            self.acquired_at.format("%H:%M:%S.%3f")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Line has no SENSOR_VALUE marker: {0:?}")]
    Malformed(String),

    #[error("Sensor value is not an integer: {0:?}")]
    NotANumber(String),
}

/// Extracts the luminosity value from a device line.
///
/// The marker may appear anywhere in the line; the value is the signed decimal
/// integer that immediately follows it. Trailing text after the digits is ignored.
pub fn parse_sensor_line(text: &str) -> Result<LuminosityReading, ParseError> {
    let (_, suffix) = text
        .split_once(SENSOR_MARKER)
        .ok_or_else(|| ParseError::Malformed(text.to_string()))?;

    let suffix = suffix.trim_start();
    let sign_len = usize::from(suffix.starts_with(['-', '+']));
    let digits_len = suffix[sign_len..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .count();

    if digits_len == 0 {
        return Err(ParseError::NotANumber(suffix.trim_end().to_string()));
    }

    let number = &suffix[..sign_len + digits_len];
    number
        .parse::<i64>()
        .map(LuminosityReading::new)
        .map_err(|_| ParseError::NotANumber(number.to_string()))
}
