//! Canonical timestamp used by operations, sync state and entities

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Textual layout written by older clients (UTC, one-second resolution).
pub const LEGACY_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

/// Unix epoch milliseconds.
///
/// Serialized as a JSON integer. Deserialization also accepts the legacy
/// `YYYY-MM-DD HH:MM:SS` text, RFC 3339, and a decimal string of milliseconds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "RawTimestamp", into = "i64")]
pub struct Timestamp(i64);

impl Timestamp {
    /// The epoch; used for zeroed sync state.
    pub const ZERO: Self = Self(0);

    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(self) -> i64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Parse any accepted textual form.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::Decode("empty timestamp".to_string()));
        }

        if value.bytes().all(|byte| byte.is_ascii_digit()) {
            return value
                .parse::<i64>()
                .map(Self)
                .map_err(|error| Error::Decode(format!("timestamp {value:?}: {error}")));
        }

        if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
            return Ok(Self(parsed.timestamp_millis()));
        }

        NaiveDateTime::parse_from_str(value, LEGACY_LAYOUT)
            .map(|parsed| Self(parsed.and_utc().timestamp_millis()))
            .map_err(|_| Error::Decode(format!("unrecognized timestamp {value:?}")))
    }

    /// Render in the legacy layout, truncating to whole seconds.
    pub fn to_legacy_string(self) -> String {
        DateTime::<Utc>::from_timestamp_millis(self.0)
            .map_or_else(|| self.0.to_string(), |dt| dt.format(LEGACY_LAYOUT).to_string())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::<Utc>::from_timestamp_millis(self.0) {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
            None => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<Timestamp> for i64 {
    fn from(value: Timestamp) -> Self {
        value.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(String),
}

impl TryFrom<RawTimestamp> for Timestamp {
    type Error = Error;

    fn try_from(value: RawTimestamp) -> Result<Self> {
        match value {
            RawTimestamp::Millis(millis) => Ok(Self(millis)),
            RawTimestamp::Text(text) => Self::parse(&text),
        }
    }
}
