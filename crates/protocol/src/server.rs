//! Server → Client push messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Severity;

/// An optional push field that keeps unrecognized values instead of failing
/// the whole message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Lenient<T> {
    Known(T),
    Other(Value),
}

impl<T> Lenient<T> {
    /// The typed value, or the raw JSON it could not be read from.
    pub fn into_known(self) -> Result<T, Value> {
        match self {
            Lenient::Known(value) => Ok(value),
            Lenient::Other(raw) => Err(raw),
        }
    }
}

/// Messages pushed by the server over the notification channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Notification {
        message: String,
        #[serde(
            rename = "alertType",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        alert_type: Option<Lenient<Severity>>,
        /// Display time in milliseconds. Non-positive means "until dismissed".
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<Lenient<f64>>,
    },
}

impl ServerMessage {
    /// Parse a single text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Normalize a pushed `duration` into whole milliseconds.
///
/// `None` stays `None` so the caller can apply its default; zero, negative,
/// and non-finite values collapse to `Some(0)`.
pub fn duration_ms(duration: Option<f64>) -> Option<u64> {
    duration.map(|d| {
        if d.is_finite() && d > 0.0 {
            d.round() as u64
        } else {
            0
        }
    })
}
