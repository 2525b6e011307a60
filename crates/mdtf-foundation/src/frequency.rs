//! The closed set of temporal sampling frequencies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown frequency '{0}' (expected one of mon, day, 6hr, 3hr, 1hr, annual)")]
pub struct FrequencyError(pub String);

/// Temporal sampling of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Frequency {
    Hr1,
    Hr3,
    Hr6,
    Day,
    Mon,
    Annual,
}

const CANONICAL: &[(&str, Frequency)] = &[
    ("annual", Frequency::Annual),
    ("mon", Frequency::Mon),
    ("day", Frequency::Day),
    ("6hr", Frequency::Hr6),
    ("3hr", Frequency::Hr3),
    ("1hr", Frequency::Hr1),
];

const SYNONYMS: &[(&str, Frequency)] = &[
    ("monthly", Frequency::Mon),
    ("month", Frequency::Mon),
    ("daily", Frequency::Day),
    ("yearly", Frequency::Annual),
    ("year", Frequency::Annual),
    ("yr", Frequency::Annual),
    ("hourly", Frequency::Hr1),
    ("hr", Frequency::Hr1),
    ("6hourly", Frequency::Hr6),
    ("3hourly", Frequency::Hr3),
];

impl Frequency {
    pub const ALL: [Frequency; 6] = [
        Frequency::Mon,
        Frequency::Day,
        Frequency::Hr6,
        Frequency::Hr3,
        Frequency::Hr1,
        Frequency::Annual,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Hr1 => "1hr",
            Frequency::Hr3 => "3hr",
            Frequency::Hr6 => "6hr",
            Frequency::Day => "day",
            Frequency::Mon => "mon",
            Frequency::Annual => "annual",
        }
    }

    /// Nominal sampling interval in days (months and years use their mean length).
    pub fn nominal_step_days(self) -> f64 {
        match self {
            Frequency::Hr1 => 1.0 / 24.0,
            Frequency::Hr3 => 3.0 / 24.0,
            Frequency::Hr6 => 6.0 / 24.0,
            Frequency::Day => 1.0,
            Frequency::Mon => 31.0,
            Frequency::Annual => 366.0,
        }
    }

    pub fn nominal_step_seconds(self) -> i64 {
        (self.nominal_step_days() * 86_400.0).round() as i64
    }

    /// Parse a path segment such as `monthly`, `ts/monthly` or `mon`.
    ///
    /// The segment must *end* in a known token; the remainder is ignored.
    /// Returns `None` when no known token terminates the segment.
    pub fn from_path_segment(segment: &str) -> Option<Frequency> {
        let lower = segment.to_ascii_lowercase();
        if let Ok(freq) = lower.parse() {
            return Some(freq);
        }
        let tail = lower
            .rsplit(|c: char| c == '_' || c == '-' || c == '.' || c == '/')
            .next()
            .unwrap_or(&lower);
        tail.parse().ok()
    }
}

impl FromStr for Frequency {
    type Err = FrequencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        CANONICAL
            .iter()
            .chain(SYNONYMS.iter())
            .find(|(token, _)| *token == needle)
            .map(|(_, freq)| *freq)
            .ok_or_else(|| FrequencyError(s.to_string()))
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Frequency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Frequency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
