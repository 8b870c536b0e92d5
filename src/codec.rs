//! # Wire Codec Module
//!
//! Converts between raw characteristic payloads and structured values.
//!
//! ## Telemetry Frames
//! The peripheral notifies UTF-8 text frames of comma-separated decimals:
//! ```text
//! accelX,accelY,accelZ,gyroX,gyroY,gyroZ,temp[,ignored...]
//! ```
//! Decoding is stateless, so a malformed frame never affects the next one.
//!
//! ## Commands
//! Outbound commands are plain UTF-8 text. The calibration trigger is `"0"`.
//! Writes are fire-and-forget: the peripheral does not reply with a frame.

use crate::sensor::{SensorSample, Vec3};
use std::fmt;

/// Number of numeric fields a telemetry frame must carry
pub const FRAME_FIELDS: usize = 7;

/// Payload that starts a calibration on the peripheral
pub const CALIBRATION_TRIGGER: &str = "0";

/// Payload of the connectivity test message
pub const TEST_MESSAGE: &str = "Hello from Web";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    NotUtf8,
    TooFewFields { found: usize },
    NotNumeric,
    NotFinite,
}

/// A frame that could not be decoded.
///
/// Per-frame and non-fatal: the notification subscription keeps running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    /// Index of the offending field, when one field is to blame
    pub field: Option<usize>,
    pub frame: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.field) {
            (ParseErrorKind::NotUtf8, _) => write!(f, "Frame is not valid UTF-8"),
            (ParseErrorKind::TooFewFields { found }, _) => write!(
                f,
                "Frame {:?} has {} fields, expected at least {}",
                self.frame, found, FRAME_FIELDS
            ),
            (ParseErrorKind::NotNumeric, Some(i)) => {
                write!(f, "Field {} of frame {:?} is not a number", i, self.frame)
            }
            (ParseErrorKind::NotFinite, Some(i)) => {
                write!(f, "Field {} of frame {:?} is not finite", i, self.frame)
            }
            (kind, None) => write!(f, "Malformed frame {:?}: {:?}", self.frame, kind),
        }
    }
}

impl std::error::Error for ParseError {}

/// Decode one notification payload.
///
/// Returns `Ok(None)` for empty or whitespace-only frames, which carry no sample.
pub fn decode(raw: &[u8]) -> Result<Option<SensorSample>, ParseError> {
    let text = std::str::from_utf8(raw).map_err(|_| ParseError {
        kind: ParseErrorKind::NotUtf8,
        field: None,
        frame: String::from_utf8_lossy(raw).into_owned(),
    })?;

    // Firmware often terminates frames with CR/LF or a C string NUL
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if text.is_empty() {
        return Ok(None);
    }

    let tokens: Vec<&str> = text.split(',').collect();
    if tokens.len() < FRAME_FIELDS {
        return Err(ParseError {
            kind: ParseErrorKind::TooFewFields { found: tokens.len() },
            field: None,
            frame: text.to_string(),
        });
    }

    let mut fields = [0.0f64; FRAME_FIELDS];
    for (i, token) in tokens.iter().take(FRAME_FIELDS).enumerate() {
        fields[i] = parse_field(token).map_err(|kind| ParseError {
            kind,
            field: Some(i),
            frame: text.to_string(),
        })?;
    }

    Ok(Some(SensorSample::new(
        Vec3::new(fields[0], fields[1], fields[2]),
        Vec3::new(fields[3], fields[4], fields[5]),
        fields[6],
    )))
}

fn parse_field(token: &str) -> Result<f64, ParseErrorKind> {
    let token = token.trim();
    // "inf" and "NaN" parse fine and are rejected below
    let value: f64 = token.parse().map_err(|_| ParseErrorKind::NotNumeric)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ParseErrorKind::NotFinite)
    }
}

/// Commands written to the peripheral's characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Calibrate,
    TestMessage,
    Text(String),
}

impl Command {
    pub fn as_text(&self) -> &str {
        match self {
            Command::Calibrate => CALIBRATION_TRIGGER,
            Command::TestMessage => TEST_MESSAGE,
            Command::Text(text) => text,
        }
    }
}

pub fn encode_command(command: &Command) -> Vec<u8> {
    command.as_text().as_bytes().to_vec()
}
