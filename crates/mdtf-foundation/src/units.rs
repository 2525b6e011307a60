//! Unit dimensional analysis for CF `units` attributes.
//!
//! Units are represented in terms of SI base dimensions with two kinds:
//!
//! - **Multiplicative**: SI units and their scaled variants (m, cm, hPa, mm/day)
//! - **Affine**: temperature scales with offsets (degC, degF)
//!
//! A value `x` in a unit corresponds to `x * scale + offset` in the coherent
//! SI unit of the same dimension (offset is zero for multiplicative units).
//!
//! # Parsing
//!
//! [`Unit::parse`] accepts the udunits spellings found in model output:
//!
//! - products separated by spaces, `.` or `*` (`kg m-2 s-1`, `m.s-1`)
//! - a `/` divides by the *next* factor only (`W/m2`, `mm/day`)
//! - integer exponents written `m2`, `m-2`, `m^2` or `m**2`
//! - SI prefixes (`hPa`, `km`, `mm`) and numeric factors (`1e-3 kg`)
//! - percent, ppm/ppb, and latitude/longitude degrees
//!
//! Affine units are only valid on their own; `degC/day` is rejected.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error("unknown unit '{0}'")]
    Unknown(String),

    #[error("malformed unit expression '{0}'")]
    Malformed(String),

    #[error("affine unit '{0}' cannot appear in a compound expression")]
    AffineInCompound(String),

    #[error("cannot convert '{from}' to '{to}': incompatible dimensions")]
    Incompatible { from: String, to: String },
}

/// A physical unit with dimensional exponents, kind and scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    kind: UnitKind,
    dims: UnitDimensions,
    /// Scale factor relative to the SI coherent unit (1.0 = base SI unit)
    scale: f64,
}

/// Unit kind, determining which algebra is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UnitKind {
    Multiplicative,

    /// Temperature scales with offsets.
    Affine {
        /// SI value of the scale's zero point (273.15 for Celsius)
        offset: f64,
    },
}

/// SI base dimensional exponents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UnitDimensions {
    pub length: i8,
    pub mass: i8,
    pub time: i8,
    pub temperature: i8,
    pub current: i8,
    pub amount: i8,
    /// Plane angle, tracked so `degrees_north` never converts to a ratio
    pub angle: i8,
}

impl UnitDimensions {
    pub const DIMENSIONLESS: UnitDimensions = UnitDimensions {
        length: 0,
        mass: 0,
        time: 0,
        temperature: 0,
        current: 0,
        amount: 0,
        angle: 0,
    };

    pub const METER: UnitDimensions = UnitDimensions {
        length: 1,
        ..Self::DIMENSIONLESS
    };

    pub const KILOGRAM: UnitDimensions = UnitDimensions {
        mass: 1,
        ..Self::DIMENSIONLESS
    };

    pub const SECOND: UnitDimensions = UnitDimensions {
        time: 1,
        ..Self::DIMENSIONLESS
    };

    pub const KELVIN: UnitDimensions = UnitDimensions {
        temperature: 1,
        ..Self::DIMENSIONLESS
    };

    pub const AMPERE: UnitDimensions = UnitDimensions {
        current: 1,
        ..Self::DIMENSIONLESS
    };

    pub const MOLE: UnitDimensions = UnitDimensions {
        amount: 1,
        ..Self::DIMENSIONLESS
    };

    pub const RADIAN: UnitDimensions = UnitDimensions {
        angle: 1,
        ..Self::DIMENSIONLESS
    };

    const fn derived(length: i8, mass: i8, time: i8) -> UnitDimensions {
        UnitDimensions {
            length,
            mass,
            time,
            ..Self::DIMENSIONLESS
        }
    }

    pub fn is_dimensionless(&self) -> bool {
        *self == Self::DIMENSIONLESS
    }

    /// Multiply dimensions (add exponents).
    pub fn multiply(&self, other: &UnitDimensions) -> UnitDimensions {
        UnitDimensions {
            length: self.length + other.length,
            mass: self.mass + other.mass,
            time: self.time + other.time,
            temperature: self.temperature + other.temperature,
            current: self.current + other.current,
            amount: self.amount + other.amount,
            angle: self.angle + other.angle,
        }
    }

    /// Raise dimensions to a power (scale exponents).
    pub fn pow(&self, exponent: i8) -> UnitDimensions {
        UnitDimensions {
            length: self.length * exponent,
            mass: self.mass * exponent,
            time: self.time * exponent,
            temperature: self.temperature * exponent,
            current: self.current * exponent,
            amount: self.amount * exponent,
            angle: self.angle * exponent,
        }
    }
}

/// Linear map `y = x * factor + offset` between two compatible units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub factor: f64,
    pub offset: f64,
}

impl Conversion {
    pub const IDENTITY: Conversion = Conversion {
        factor: 1.0,
        offset: 0.0,
    };

    pub fn apply(&self, value: f64) -> f64 {
        value * self.factor + self.offset
    }

    /// Map a converted value back to the source unit.
    pub fn invert(&self, value: f64) -> f64 {
        (value - self.offset) / self.factor
    }

    /// True when applying the conversion would not change any value.
    pub fn is_identity(&self) -> bool {
        (self.factor - 1.0).abs() < 1e-12 && self.offset.abs() < 1e-12
    }
}

impl Unit {
    pub const DIMENSIONLESS: Unit = Unit::multiplicative(UnitDimensions::DIMENSIONLESS, 1.0);

    pub const fn new(kind: UnitKind, dims: UnitDimensions, scale: f64) -> Self {
        Self { kind, dims, scale }
    }

    const fn multiplicative(dims: UnitDimensions, scale: f64) -> Self {
        Self::new(UnitKind::Multiplicative, dims, scale)
    }

    pub const fn kind(&self) -> &UnitKind {
        &self.kind
    }

    pub const fn dims(&self) -> &UnitDimensions {
        &self.dims
    }

    pub const fn scale(&self) -> f64 {
        self.scale
    }

    pub fn is_multiplicative(&self) -> bool {
        matches!(self.kind, UnitKind::Multiplicative)
    }

    fn offset(&self) -> f64 {
        match self.kind {
            UnitKind::Multiplicative => 0.0,
            UnitKind::Affine { offset } => offset,
        }
    }

    /// Multiply two units (dimensions add, scales multiply).
    ///
    /// Only valid for multiplicative units.
    pub fn multiply(&self, other: &Unit) -> Option<Unit> {
        if !self.is_multiplicative() || !other.is_multiplicative() {
            return None;
        }
        Some(Unit::multiplicative(
            self.dims.multiply(&other.dims),
            self.scale * other.scale,
        ))
    }

    /// Raise a unit to an integer power. Only valid for multiplicative units.
    pub fn pow(&self, exponent: i8) -> Option<Unit> {
        if !self.is_multiplicative() {
            return None;
        }
        Some(Unit::multiplicative(
            self.dims.pow(exponent),
            self.scale.powi(exponent as i32),
        ))
    }

    /// Units are convertible when their dimensions agree, regardless of kind.
    pub fn is_convertible_to(&self, other: &Unit) -> bool {
        self.dims == other.dims
    }

    /// Conversion taking values in `self` to values in `target`.
    pub fn conversion_to(&self, target: &Unit) -> Option<Conversion> {
        if !self.is_convertible_to(target) {
            return None;
        }
        Some(Conversion {
            factor: self.scale / target.scale,
            offset: (self.offset() - target.offset()) / target.scale,
        })
    }

    /// Parse a udunits-style unit string.
    pub fn parse(text: &str) -> Result<Unit, UnitError> {
        let factors = tokenize(text)?;
        if factors.is_empty() {
            return Ok(Unit::DIMENSIONLESS);
        }

        // A lone affine unit keeps its offset.
        if let [Factor::Named { name, exponent: 1, divide: false }] = factors.as_slice() {
            return resolve_named(name);
        }

        let mut unit = Unit::DIMENSIONLESS;
        for factor in &factors {
            let (term, divide) = match factor {
                Factor::Number { value, divide } => {
                    (Unit::multiplicative(UnitDimensions::DIMENSIONLESS, *value), *divide)
                }
                Factor::Named {
                    name,
                    exponent,
                    divide,
                } => {
                    let base = resolve_named(name)?;
                    let raised = base
                        .pow(*exponent)
                        .ok_or_else(|| UnitError::AffineInCompound(name.clone()))?;
                    (raised, *divide)
                }
            };
            let term = if divide {
                term.pow(-1)
                    .ok_or_else(|| UnitError::Malformed(text.to_string()))?
            } else {
                term
            };
            unit = unit
                .multiply(&term)
                .ok_or_else(|| UnitError::Malformed(text.to_string()))?;
        }
        Ok(unit)
    }
}

impl FromStr for Unit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Unit::parse(s)
    }
}

/// Conversion between two unit strings, or an error naming both.
pub fn conversion(from: &str, to: &str) -> Result<Conversion, UnitError> {
    let source = Unit::parse(from)?;
    let target = Unit::parse(to)?;
    source
        .conversion_to(&target)
        .ok_or_else(|| UnitError::Incompatible {
            from: from.to_string(),
            to: to.to_string(),
        })
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Factor {
    Number { value: f64, divide: bool },
    Named { name: String, exponent: i8, divide: bool },
}

fn tokenize(text: &str) -> Result<Vec<Factor>, UnitError> {
    let malformed = || UnitError::Malformed(text.to_string());
    let chars: Vec<char> = text.trim().chars().collect();
    let mut factors = Vec::new();
    let mut divide = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() || c == '*' || c == '.' {
            i += 1;
            continue;
        }
        if c == '/' {
            if divide {
                return Err(malformed());
            }
            divide = true;
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || ((c == '-' || c == '+') && next_is_digit(&chars, i)) {
            let start = i;
            i += 1;
            while i < chars.len() {
                let d = chars[i];
                let after_exp_marker =
                    (d == '-' || d == '+') && matches!(chars[i - 1], 'e' | 'E');
                let exp_marker = matches!(d, 'e' | 'E')
                    && (next_is_digit(&chars, i)
                        || (matches!(chars.get(i + 1), Some('-' | '+'))
                            && next_is_digit(&chars, i + 1)));
                if d.is_ascii_digit() || d == '.' || exp_marker || after_exp_marker {
                    i += 1;
                } else {
                    break;
                }
            }
            let literal: String = chars[start..i].iter().collect();
            let value: f64 = literal.parse().map_err(|_| malformed())?;
            factors.push(Factor::Number { value, divide });
            divide = false;
            continue;
        }

        if c == '%' {
            factors.push(Factor::Named {
                name: "%".to_string(),
                exponent: 1,
                divide,
            });
            divide = false;
            i += 1;
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '°' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphabetic() || chars[i] == '_' || chars[i] == '°')
            {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect();

            // Optional `^` or `**` before the exponent.
            if chars.get(i) == Some(&'^') {
                i += 1;
            } else if chars.get(i) == Some(&'*') && chars.get(i + 1) == Some(&'*') {
                i += 2;
            }
            let exp_start = i;
            if matches!(chars.get(i), Some('-' | '+')) && next_is_digit(&chars, i) {
                i += 1;
            }
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let exponent = if i > exp_start {
                let literal: String = chars[exp_start..i].iter().collect();
                literal.parse::<i8>().map_err(|_| malformed())?
            } else {
                1
            };

            factors.push(Factor::Named {
                name,
                exponent,
                divide,
            });
            divide = false;
            continue;
        }

        return Err(malformed());
    }

    if divide {
        return Err(malformed());
    }
    Ok(factors)
}

fn next_is_digit(chars: &[char], i: usize) -> bool {
    chars.get(i + 1).is_some_and(|c| c.is_ascii_digit())
}

// ============================================================================
// Name resolution
// ============================================================================

/// SI metric prefixes with their power-of-ten exponents.
const SI_PREFIXES: &[(&str, i32)] = &[
    ("Y", 24),
    ("Z", 21),
    ("E", 18),
    ("P", 15),
    ("T", 12),
    ("G", 9),
    ("M", 6),
    ("k", 3),
    ("h", 2),
    ("da", 1),
    ("d", -1),
    ("c", -2),
    ("m", -3),
    ("μ", -6),
    ("u", -6),
    ("n", -9),
    ("p", -12),
    ("f", -15),
    ("a", -18),
];

const DEGREE: f64 = std::f64::consts::PI / 180.0;

fn exact_unit(name: &str) -> Option<Unit> {
    let dims = UnitDimensions::derived;
    let unit = match name {
        "1" | "dimensionless" => Unit::DIMENSIONLESS,
        "%" | "percent" => Unit::multiplicative(UnitDimensions::DIMENSIONLESS, 0.01),
        "ppm" | "ppmv" => Unit::multiplicative(UnitDimensions::DIMENSIONLESS, 1e-6),
        "ppb" | "ppbv" => Unit::multiplicative(UnitDimensions::DIMENSIONLESS, 1e-9),

        "m" | "meter" | "meters" | "metre" | "metres" => {
            Unit::multiplicative(UnitDimensions::METER, 1.0)
        }
        "g" | "gram" | "grams" => Unit::multiplicative(UnitDimensions::KILOGRAM, 0.001),
        "kg" => Unit::multiplicative(UnitDimensions::KILOGRAM, 1.0),
        "s" | "sec" | "second" | "seconds" => Unit::multiplicative(UnitDimensions::SECOND, 1.0),
        "min" | "minute" | "minutes" => Unit::multiplicative(UnitDimensions::SECOND, 60.0),
        "h" | "hr" | "hour" | "hours" => Unit::multiplicative(UnitDimensions::SECOND, 3_600.0),
        "d" | "day" | "days" => Unit::multiplicative(UnitDimensions::SECOND, 86_400.0),
        // Julian year
        "yr" | "year" | "years" => Unit::multiplicative(UnitDimensions::SECOND, 31_557_600.0),
        "A" | "ampere" => Unit::multiplicative(UnitDimensions::AMPERE, 1.0),
        "mol" | "mole" => Unit::multiplicative(UnitDimensions::MOLE, 1.0),

        "K" | "kelvin" | "degK" | "deg_K" => Unit::multiplicative(UnitDimensions::KELVIN, 1.0),
        "degC" | "deg_C" | "degree_C" | "degrees_C" | "°C" | "celsius" | "Celsius" => {
            Unit::new(UnitKind::Affine { offset: 273.15 }, UnitDimensions::KELVIN, 1.0)
        }
        "degF" | "deg_F" | "degree_F" | "degrees_F" | "°F" | "fahrenheit" | "Fahrenheit" => {
            Unit::new(
                UnitKind::Affine {
                    offset: 459.67 * 5.0 / 9.0,
                },
                UnitDimensions::KELVIN,
                5.0 / 9.0,
            )
        }

        "N" | "newton" => Unit::multiplicative(dims(1, 1, -2), 1.0),
        "J" | "joule" => Unit::multiplicative(dims(2, 1, -2), 1.0),
        "W" | "watt" => Unit::multiplicative(dims(2, 1, -3), 1.0),
        "Pa" | "pascal" => Unit::multiplicative(dims(-1, 1, -2), 1.0),
        "bar" => Unit::multiplicative(dims(-1, 1, -2), 1e5),
        "mb" | "mbar" | "millibar" => Unit::multiplicative(dims(-1, 1, -2), 100.0),
        "atm" => Unit::multiplicative(dims(-1, 1, -2), 101_325.0),

        "rad" | "radian" | "radians" => Unit::multiplicative(UnitDimensions::RADIAN, 1.0),
        "degree" | "degrees" | "deg" | "°" | "arc_degree" | "degrees_north" | "degree_north"
        | "degrees_N" | "degree_N" | "degreesN" | "degrees_east" | "degree_east"
        | "degrees_E" | "degree_E" | "degreesE" => {
            Unit::multiplicative(UnitDimensions::RADIAN, DEGREE)
        }
        _ => return None,
    };
    Some(unit)
}

/// Units that must not be decomposed into prefix + base.
const RESERVED_UNITS: &[&str] = &["m", "kg", "mol", "Pa", "min", "mb", "d", "h", "cd"];

fn try_parse_prefix(name: &str) -> Option<(f64, &str)> {
    // Two-character prefix first so `da` wins over `d`.
    SI_PREFIXES
        .iter()
        .filter(|(p, _)| p.chars().count() == 2)
        .chain(SI_PREFIXES.iter().filter(|(p, _)| p.chars().count() == 1))
        .find(|(p, _)| name.len() > p.len() && name.starts_with(p))
        .map(|&(p, exp)| (10.0_f64.powi(exp), &name[p.len()..]))
}

fn resolve_named(name: &str) -> Result<Unit, UnitError> {
    if let Some(unit) = exact_unit(name) {
        return Ok(unit);
    }
    if !RESERVED_UNITS.contains(&name) {
        if let Some((prefix_scale, base_name)) = try_parse_prefix(name) {
            if let Some(base) = exact_unit(base_name).filter(Unit::is_multiplicative) {
                return Ok(Unit::multiplicative(*base.dims(), base.scale() * prefix_scale));
            }
        }
    }
    Err(UnitError::Unknown(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9 * b.abs().max(1.0)
    }

    #[test]
    fn meters_to_centimeters() {
        let conv = conversion("m", "cm").unwrap();
        assert!(close(conv.factor, 100.0));
        assert!(close(conv.apply(0.5), 50.0));
    }

    #[test]
    fn temperature_scales() {
        let c_to_k = conversion("degC", "K").unwrap();
        assert!(close(c_to_k.apply(0.0), 273.15));
        let k_to_c = conversion("K", "degC").unwrap();
        assert!(close(k_to_c.apply(300.0), 26.85));
        let f_to_c = conversion("degF", "degC").unwrap();
        assert!(close(f_to_c.apply(212.0), 100.0));
    }

    #[test]
    fn rate_units_with_division() {
        let conv = conversion("mm/day", "m s-1").unwrap();
        assert!(close(conv.factor, 1e-3 / 86_400.0));
        assert!(matches!(
            conversion("kg m-2 s-1", "mm/day"),
            Err(UnitError::Incompatible { .. })
        ));
    }

    #[test]
    fn equivalent_spellings_are_identity() {
        for (a, b) in [("m s-1", "m/s"), ("m.s-1", "m s^-1"), ("W/m2", "W m**-2"), ("hPa", "mbar")]
        {
            assert!(conversion(a, b).unwrap().is_identity(), "{a} vs {b}");
        }
    }

    #[test]
    fn pressure_prefixes_and_percent() {
        assert!(close(conversion("hPa", "Pa").unwrap().factor, 100.0));
        assert!(close(conversion("1", "%").unwrap().factor, 100.0));
        assert!(close(conversion("1e-3", "1").unwrap().factor, 1e-3));
    }

    #[test]
    fn incompatible_and_unknown() {
        assert!(matches!(
            conversion("m", "s"),
            Err(UnitError::Incompatible { .. })
        ));
        assert!(matches!(Unit::parse("furlongs"), Err(UnitError::Unknown(_))));
        assert!(matches!(
            Unit::parse("degC/day"),
            Err(UnitError::AffineInCompound(_))
        ));
        assert!(conversion("degrees_north", "1").is_err());
    }
}
