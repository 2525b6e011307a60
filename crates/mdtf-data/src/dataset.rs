//! In-memory model of a NetCDF-like dataset.
//!
//! Values are held as row-major `f64` arrays; a variable's shape is the
//! lengths of its dimensions in declaration order. Time, when present, is
//! the first dimension of every time-dependent variable.

use indexmap::IndexMap;
use mdtf_foundation::{COORDINATE_VARIABLES, Calendar, CalendarError, TimeUnits};

pub const TIME: &str = "time";
pub const TIME_BOUNDS: &str = "time_bnds";

/// Width of an integer attribute as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

/// An attribute value. Numeric attributes keep their on-disk type so a
/// read-then-write cycle reproduces them.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Texts(Vec<String>),
    Number(f64),
    Numbers(Vec<f64>),
    Floats(Vec<f32>),
    Signed(IntWidth, Vec<i64>),
    Unsigned(IntWidth, Vec<u64>),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric values widened to `f64`; `None` for text.
    pub fn as_numbers(&self) -> Option<Vec<f64>> {
        match self {
            AttrValue::Text(_) | AttrValue::Texts(_) => None,
            AttrValue::Number(n) => Some(vec![*n]),
            AttrValue::Numbers(v) => Some(v.clone()),
            AttrValue::Floats(v) => Some(v.iter().map(|x| f64::from(*x)).collect()),
            AttrValue::Signed(_, v) => Some(v.iter().map(|x| *x as f64).collect()),
            AttrValue::Unsigned(_, v) => Some(v.iter().map(|x| *x as f64).collect()),
        }
    }

    /// The single numeric value of a scalar attribute.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            other => match other.as_numbers()?.as_slice() {
                [x] => Some(*x),
                _ => None,
            },
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Text(s)
    }
}

impl From<f64> for AttrValue {
    fn from(n: f64) -> Self {
        AttrValue::Number(n)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub dims: Vec<String>,
    pub attrs: IndexMap<String, AttrValue>,
    /// `None` when only the header was read
    pub data: Option<Vec<f64>>,
}

impl Variable {
    pub fn new(name: impl Into<String>, dims: &[&str]) -> Self {
        Self {
            name: name.into(),
            dims: dims.iter().map(|d| d.to_string()).collect(),
            attrs: IndexMap::new(),
            data: None,
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn with_data(mut self, data: Vec<f64>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn text_attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(AttrValue::as_text)
    }

    pub fn number_attr(&self, key: &str) -> Option<f64> {
        self.attrs.get(key).and_then(AttrValue::as_number)
    }

    pub fn is_time_dependent(&self) -> bool {
        self.dims.first().is_some_and(|d| d == TIME)
    }

    /// `_FillValue` or `missing_value`, if declared.
    pub fn fill_value(&self) -> Option<f64> {
        self.number_attr("_FillValue")
            .or_else(|| self.number_attr("missing_value"))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub dims: IndexMap<String, usize>,
    pub variables: IndexMap<String, Variable>,
    pub attrs: IndexMap<String, AttrValue>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dim(mut self, name: &str, len: usize) -> Self {
        self.dims.insert(name.to_string(), len);
        self
    }

    pub fn with_variable(mut self, variable: Variable) -> Self {
        self.variables.insert(variable.name.clone(), variable);
        self
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.variables.get_mut(name)
    }

    pub fn global_text(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(AttrValue::as_text)
    }

    pub fn shape(&self, variable: &Variable) -> Vec<usize> {
        variable
            .dims
            .iter()
            .map(|d| self.dims.get(d).copied().unwrap_or(0))
            .collect()
    }

    /// Coordinate variables: the fixed CF names plus any variable named
    /// after one of its own dimensions, and bounds variables.
    pub fn is_coordinate(&self, variable: &Variable) -> bool {
        COORDINATE_VARIABLES.contains(&variable.name.as_str())
            || variable.dims.iter().any(|d| *d == variable.name)
            || self
                .variables
                .values()
                .any(|v| v.text_attr("bounds") == Some(variable.name.as_str()))
    }

    /// Data variables in declaration order.
    pub fn data_variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values().filter(|v| !self.is_coordinate(v))
    }

    pub fn time(&self) -> Option<&Variable> {
        self.variables.get(TIME)
    }

    /// Parsed time units of the `time` variable. `None` when there is no
    /// time coordinate.
    pub fn time_units(&self) -> Option<Result<TimeUnits, CalendarError>> {
        let time = self.time()?;
        let calendar = match time.text_attr("calendar") {
            Some(name) => match name.parse::<Calendar>() {
                Ok(cal) => cal,
                Err(e) => return Some(Err(e)),
            },
            None => Calendar::ProlepticGregorian,
        };
        let units = time.text_attr("units").unwrap_or("");
        Some(TimeUnits::parse(units, calendar))
    }

    pub fn time_values(&self) -> Option<&[f64]> {
        self.time().and_then(|t| t.data.as_deref())
    }

    /// Copy without the values of non-coordinate variables.
    pub fn header(&self) -> Dataset {
        let mut header = self.clone();
        let data_names: Vec<String> = self.data_variables().map(|v| v.name.clone()).collect();
        for name in data_names {
            if let Some(var) = header.variables.get_mut(&name) {
                var.data = None;
            }
        }
        header
    }

    /// Rename a variable in place, keeping its position.
    pub fn rename_variable(&mut self, from: &str, to: &str) -> bool {
        if from == to {
            return self.variables.contains_key(from);
        }
        if !self.variables.contains_key(from) || self.variables.contains_key(to) {
            return false;
        }
        let renamed = std::mem::take(&mut self.variables)
            .into_iter()
            .map(|(name, mut var)| {
                if name == from {
                    var.name = to.to_string();
                    (to.to_string(), var)
                } else {
                    (name, var)
                }
            })
            .collect();
        self.variables = renamed;
        true
    }

    /// Keep `name` and the coordinate and bounds variables it depends on.
    pub fn subset(&self, name: &str) -> Option<Dataset> {
        let target = self.variable(name)?;
        let mut keep: Vec<&str> = vec![name];
        for dim in &target.dims {
            if self.variables.contains_key(dim.as_str()) {
                keep.push(dim);
            }
        }
        if let Some(coords) = target.text_attr("coordinates") {
            keep.extend(coords.split_whitespace().filter(|c| self.variables.contains_key(*c)));
        }
        if target.is_time_dependent() && self.variables.contains_key(TIME_BOUNDS) {
            keep.push(TIME_BOUNDS);
        }
        let bounds: Vec<&str> = keep
            .iter()
            .filter_map(|k| self.variables.get(*k).and_then(|v| v.text_attr("bounds")))
            .filter(|b| self.variables.contains_key(*b))
            .collect();
        keep.extend(bounds);

        let variables: IndexMap<String, Variable> = self
            .variables
            .iter()
            .filter(|(k, _)| keep.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let dims = self
            .dims
            .iter()
            .filter(|(d, _)| variables.values().any(|v| v.dims.contains(d)))
            .map(|(d, n)| (d.clone(), *n))
            .collect();
        Some(Dataset {
            dims,
            variables,
            attrs: self.attrs.clone(),
        })
    }
}
