//! Defines custom `Duration` type.

use std::{fmt, time};

use serde::de::{Deserialize, Deserializer, Error};
use serde::ser::{Serialize, Serializer};

/// Duration to millisecond resolution, thin wrapper around `time::Duration` allowing for custom
/// (de)serialisation.
///
/// Serialised to/from TOML/JSON as a human readable time (e.g. "2s", "500ms", "1m 30s").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Duration(pub time::Duration);

impl Duration {
    /// Create a new Duration from given number of milliseconds.
    pub fn from_millis(millis: u64) -> Self {
        Duration(time::Duration::from_millis(millis))
    }

    /// Create a new Duration from given number of seconds.
    pub fn from_secs(seconds: u64) -> Self {
        Duration(time::Duration::from_secs(seconds))
    }

    /// Get this duration as number of milliseconds.
    pub fn as_millis(&self) -> u128 {
        self.0.as_millis()
    }

    /// Get the underlying `std::time::Duration`, e.g. for use with timers.
    pub fn as_std(&self) -> time::Duration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.as_secs() == 0 && self.0.subsec_nanos() == 0
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(self.0).to_string())
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s: String = Deserialize::deserialize(deserializer)?;
        humantime::parse_duration(&s)
            .map(Duration)
            .map_err(D::Error::custom)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", humantime::format_duration(self.0))
    }
}
