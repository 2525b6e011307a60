//! Calendar-aware decoding of CF time coordinates.
//!
//! Model output uses several calendars. Dates are converted to a day count
//! relative to a per-calendar epoch (0001-01-01 for the fixed-length
//! calendars, 1970-01-01 for the Gregorian one) and back; only day counts
//! from the same calendar are ever compared.
//!
//! `standard` and `gregorian` are treated as proleptic Gregorian. The two
//! agree for every date after 1582-10-15, which covers model output.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SECONDS_PER_DAY: i64 = 86_400;

const CUM_DAYS_NOLEAP: [u32; 13] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334, 365];
const CUM_DAYS_LEAP: [u32; 13] = [0, 31, 60, 91, 121, 152, 182, 213, 244, 274, 305, 335, 366];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalendarError {
    #[error("unsupported calendar '{0}'")]
    UnknownCalendar(String),

    #[error("malformed time units '{0}' (expected '<unit> since <date>')")]
    MalformedUnits(String),

    #[error("unsupported time unit '{0}'")]
    UnknownTimeUnit(String),

    #[error("malformed date '{0}'")]
    MalformedDate(String),

    #[error("malformed time range '{0}'")]
    MalformedRange(String),
}

/// CF calendar attribute values the framework understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Calendar {
    ProlepticGregorian,
    NoLeap,
    AllLeap,
    Day360,
}

impl FromStr for Calendar {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "standard" | "gregorian" | "proleptic_gregorian" => {
                Ok(Calendar::ProlepticGregorian)
            }
            "noleap" | "no_leap" | "365_day" => Ok(Calendar::NoLeap),
            "all_leap" | "366_day" => Ok(Calendar::AllLeap),
            "360_day" => Ok(Calendar::Day360),
            other => Err(CalendarError::UnknownCalendar(other.to_string())),
        }
    }
}

impl fmt::Display for Calendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Calendar::ProlepticGregorian => "proleptic_gregorian",
            Calendar::NoLeap => "noleap",
            Calendar::AllLeap => "all_leap",
            Calendar::Day360 => "360_day",
        })
    }
}

impl Calendar {
    pub fn is_leap(self, year: i32) -> bool {
        match self {
            Calendar::ProlepticGregorian => {
                (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
            }
            Calendar::NoLeap | Calendar::Day360 => false,
            Calendar::AllLeap => true,
        }
    }

    pub fn days_in_month(self, year: i32, month: u32) -> u32 {
        if self == Calendar::Day360 {
            return 30;
        }
        let table = if self.is_leap(year) {
            &CUM_DAYS_LEAP
        } else {
            &CUM_DAYS_NOLEAP
        };
        let m = month.clamp(1, 12) as usize;
        table[m] - table[m - 1]
    }

    /// Day count of a calendar date relative to this calendar's epoch.
    pub fn days_from_date(self, year: i32, month: u32, day: u32) -> i64 {
        let (y, m, d) = (year as i64, month.clamp(1, 12) as i64, day as i64);
        match self {
            Calendar::ProlepticGregorian => days_from_civil(y, m, d),
            Calendar::NoLeap => y * 365 + CUM_DAYS_NOLEAP[(m - 1) as usize] as i64 + d - 1,
            Calendar::AllLeap => y * 366 + CUM_DAYS_LEAP[(m - 1) as usize] as i64 + d - 1,
            Calendar::Day360 => y * 360 + (m - 1) * 30 + d - 1,
        }
    }

    /// Inverse of [`Calendar::days_from_date`].
    pub fn date_from_days(self, days: i64) -> (i32, u32, u32) {
        match self {
            Calendar::ProlepticGregorian => civil_from_days(days),
            Calendar::NoLeap => split_fixed_year(days, 365, &CUM_DAYS_NOLEAP),
            Calendar::AllLeap => split_fixed_year(days, 366, &CUM_DAYS_LEAP),
            Calendar::Day360 => {
                let year = days.div_euclid(360);
                let doy = days.rem_euclid(360);
                (year as i32, (doy / 30) as u32 + 1, (doy % 30) as u32 + 1)
            }
        }
    }

    /// Seconds since the calendar epoch for a date-time.
    pub fn seconds_from_datetime(self, dt: &DateTime) -> i64 {
        self.days_from_date(dt.year, dt.month, dt.day) * SECONDS_PER_DAY
            + (dt.hour as i64) * 3600
            + (dt.minute as i64) * 60
            + dt.second as i64
    }

    pub fn datetime_from_seconds(self, seconds: i64) -> DateTime {
        let days = seconds.div_euclid(SECONDS_PER_DAY);
        let secs = seconds.rem_euclid(SECONDS_PER_DAY);
        let (year, month, day) = self.date_from_days(days);
        DateTime {
            year,
            month,
            day,
            hour: (secs / 3600) as u32,
            minute: ((secs % 3600) / 60) as u32,
            second: (secs % 60) as u32,
        }
    }
}

// Howard Hinnant's civil calendar algorithms, epoch 1970-01-01.
fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = if m > 2 { m - 3 } else { m + 9 };
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(z: i64) -> (i32, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y as i32, m as u32, d as u32)
}

fn split_fixed_year(days: i64, year_len: i64, cum: &[u32; 13]) -> (i32, u32, u32) {
    let year = days.div_euclid(year_len);
    let doy = days.rem_euclid(year_len) as u32;
    let month = (1..=12).find(|&m| doy < cum[m]).unwrap_or(12);
    (year as i32, month as u32, doy - cum[month - 1] + 1)
}

/// A calendar date-time with second resolution.
///
/// Field order makes the derived `Ord` chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DateTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl DateTime {
    pub fn date(year: i32, month: u32, day: u32) -> Self {
        Self {
            year,
            month,
            day,
            hour: 0,
            minute: 0,
            second: 0,
        }
    }

    /// Parse the compact `YYYYMMDD:HHMMSS` form used in catalog time ranges.
    pub fn from_compact(s: &str) -> Result<Self, CalendarError> {
        let malformed = || CalendarError::MalformedDate(s.to_string());
        if !s.is_ascii() {
            return Err(malformed());
        }
        let (date, time) = s.split_once(':').ok_or_else(malformed)?;
        if date.len() < 8 || time.len() != 6 {
            return Err(malformed());
        }
        let split = date.len() - 4;
        let num = |t: &str| t.parse::<u32>().map_err(|_| malformed());
        let dt = Self {
            year: date[..split].parse().map_err(|_| malformed())?,
            month: num(&date[split..split + 2])?,
            day: num(&date[split + 2..])?,
            hour: num(&time[..2])?,
            minute: num(&time[2..4])?,
            second: num(&time[4..])?,
        };
        if !dt.is_valid() {
            return Err(malformed());
        }
        Ok(dt)
    }

    /// Field ranges only; day 31 is accepted in every month.
    fn is_valid(&self) -> bool {
        (1..=12).contains(&self.month)
            && (1..=31).contains(&self.day)
            && self.hour < 24
            && self.minute < 60
            && self.second < 60
    }

    /// Parse a CF reference date such as `1850-1-1`, `1979-01-01 00:00:00`
    /// or `2000-01-01T12:00:00Z`.
    fn from_reference(s: &str) -> Result<Self, CalendarError> {
        let malformed = || CalendarError::MalformedDate(s.to_string());
        let cleaned = s.trim().replace(['T', 't'], " ");
        let cleaned = cleaned.trim_end_matches(['Z', 'z']);
        let mut parts = cleaned.split_whitespace();
        let date = parts.next().ok_or_else(malformed)?;

        let mut fields = date.splitn(3, '-');
        let year = fields
            .next()
            .and_then(|v| v.parse::<i32>().ok())
            .ok_or_else(malformed)?;
        let month = fields
            .next()
            .map_or(Ok(1), |v| v.parse::<u32>())
            .map_err(|_| malformed())?;
        let day = fields
            .next()
            .map_or(Ok(1), |v| v.parse::<u32>())
            .map_err(|_| malformed())?;
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return Err(malformed());
        }

        let mut dt = DateTime::date(year, month, day);
        if let Some(time) = parts.next() {
            let mut hms = time.split(':');
            let mut next = || -> Result<f64, CalendarError> {
                hms.next()
                    .map_or(Ok(0.0), |v| v.parse::<f64>())
                    .map_err(|_| malformed())
            };
            dt.hour = next()? as u32;
            dt.minute = next()? as u32;
            dt.second = next()?.trunc() as u32;
        }
        Ok(dt)
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}{:02}{:02}:{:02}{:02}{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Parsed `<unit> since <reference>` attribute together with its calendar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeUnits {
    pub calendar: Calendar,
    /// Length of one unit in seconds.
    pub unit_seconds: f64,
    pub reference: DateTime,
}

impl TimeUnits {
    pub fn parse(units: &str, calendar: Calendar) -> Result<Self, CalendarError> {
        let lower = units.trim().to_ascii_lowercase();
        let (unit, reference) = lower
            .split_once(" since ")
            .ok_or_else(|| CalendarError::MalformedUnits(units.to_string()))?;
        let unit_seconds = match unit.trim() {
            "days" | "day" | "d" => 86_400.0,
            "hours" | "hour" | "hrs" | "hr" | "h" => 3_600.0,
            "minutes" | "minute" | "mins" | "min" => 60.0,
            "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
            other => return Err(CalendarError::UnknownTimeUnit(other.to_string())),
        };
        Ok(Self {
            calendar,
            unit_seconds,
            reference: DateTime::from_reference(reference)?,
        })
    }

    fn reference_seconds(&self) -> i64 {
        self.calendar.seconds_from_datetime(&self.reference)
    }

    /// Seconds since the calendar epoch for a raw coordinate value, rounded
    /// to the nearest second.
    pub fn to_epoch_seconds(&self, value: f64) -> i64 {
        self.reference_seconds() + (value * self.unit_seconds).round() as i64
    }

    /// Raw coordinate value for seconds since the calendar epoch.
    pub fn from_epoch_seconds(&self, seconds: i64) -> f64 {
        (seconds - self.reference_seconds()) as f64 / self.unit_seconds
    }

    pub fn decode(&self, value: f64) -> DateTime {
        self.calendar
            .datetime_from_seconds(self.to_epoch_seconds(value))
    }

    pub fn encode(&self, dt: &DateTime) -> f64 {
        self.from_epoch_seconds(self.calendar.seconds_from_datetime(dt))
    }
}

/// First and last instants of a file's time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime,
    pub end: DateTime,
}

impl TimeRange {
    pub fn new(start: DateTime, end: DateTime) -> Self {
        Self { start, end }
    }

    /// True when the range reaches from the start of `first` to the end of
    /// `last`, give or take `slack_seconds` at each end.
    ///
    /// Samples sit inside their period, so the slack is normally one
    /// sampling interval: monthly means stamped mid-January still cover
    /// January 1st.
    pub fn covers_years(&self, first: i32, last: i32, calendar: Calendar, slack_seconds: i64) -> bool {
        let seconds = |dt: &DateTime| calendar.seconds_from_datetime(dt);
        let from = seconds(&DateTime::date(first, 1, 1));
        let until = seconds(&DateTime::date(last + 1, 1, 1));
        seconds(&self.start) <= from + slack_seconds && seconds(&self.end) + slack_seconds >= until
    }

    pub fn overlaps_years(&self, first: i32, last: i32) -> bool {
        self.start.year <= last && self.end.year >= first
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for TimeRange {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // A leading '-' would be a negative year; split on the separator
        // that follows the first `:HHMMSS` group.
        let malformed = || CalendarError::MalformedRange(s.to_string());
        if !s.is_ascii() {
            return Err(malformed());
        }
        let colon = s.find(':').ok_or_else(malformed)?;
        let sep = colon + 7;
        if s.len() <= sep || &s[sep..sep + 1] != "-" {
            return Err(malformed());
        }
        Ok(Self {
            start: DateTime::from_compact(&s[..sep])?,
            end: DateTime::from_compact(&s[sep + 1..])?,
        })
    }
}
