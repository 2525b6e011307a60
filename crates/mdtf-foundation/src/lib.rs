//! MDTF Foundation
//!
//! Primitives shared by every framework crate: the closed frequency set,
//! calendar-aware time decoding, udunits-style unit conversion, and the
//! stable error codes used in run records and CLI exit paths.

pub mod calendar;
pub mod error;
pub mod frequency;
pub mod units;

pub use calendar::{Calendar, CalendarError, DateTime, TimeRange, TimeUnits};
pub use error::{ErrorKind, Reason};
pub use frequency::{Frequency, FrequencyError};
pub use units::{Conversion, Unit, UnitError};

/// Coordinate variables that never count as data variables.
pub const COORDINATE_VARIABLES: &[&str] = &["time", "time_bnds", "date", "hyam", "hybm"];
