//! Pressure-level extraction.

use mdtf_foundation::units::{self, Conversion};
use tracing::debug;

use super::{PreprocessError, Result};
use crate::dataset::{AttrValue, Dataset, Variable};

const VERTICAL_NAMES: &[&str] = &["plev", "lev", "level", "pressure", "pfull"];

/// Relative tolerance for treating a coordinate value as the requested level.
const EXACT_TOLERANCE: f64 = 1e-6;

fn level_error(var: &str, message: impl Into<String>) -> PreprocessError {
    PreprocessError::Level {
        var: var.to_string(),
        message: message.into(),
    }
}

fn is_pressure(variable: &Variable) -> bool {
    variable
        .text_attr("units")
        .is_some_and(|u| units::conversion(u, "Pa").is_ok())
}

fn is_vertical(variable: &Variable) -> bool {
    VERTICAL_NAMES.contains(&variable.name.as_str()) || is_pressure(variable)
}

/// Conversion from a coordinate's values to Pa. Without a units attribute
/// the magnitude decides between Pa and hPa.
fn to_pascal(coord: &Variable, values: &[f64]) -> std::result::Result<Conversion, String> {
    match coord.text_attr("units") {
        Some(u) => units::conversion(u, "Pa").map_err(|e| e.to_string()),
        None => {
            let max = values.iter().copied().fold(0.0, f64::max);
            let guessed = if max > 2000.0 { "Pa" } else { "hPa" };
            debug!(coord = %coord.name, guessed, "vertical coordinate has no units");
            units::conversion(guessed, "Pa").map_err(|e| e.to_string())
        }
    }
}

/// Reduce `var` to the pressure level `hpa`.
///
/// The vertical dimension is dropped and recorded as a scalar coordinate.
/// A variable that already carries a matching scalar level is returned
/// unchanged.
pub fn extract_level(ds: &Dataset, var: &str, hpa: f64) -> Result<Dataset> {
    let target = ds
        .variable(var)
        .ok_or_else(|| PreprocessError::NoSuchVariable {
            var: var.to_string(),
        })?;
    let target_pa = hpa * 100.0;

    let vertical = target.dims.iter().position(|d| {
        ds.variable(d).is_some_and(is_vertical) || VERTICAL_NAMES.contains(&d.as_str())
    });
    let Some(axis) = vertical else {
        return existing_scalar_level(ds, var, target, target_pa);
    };
    let dim = target.dims[axis].clone();
    let coord = ds
        .variable(&dim)
        .ok_or_else(|| level_error(var, format!("vertical dimension '{dim}' has no coordinate")))?;
    let levels = coord
        .data
        .as_deref()
        .ok_or_else(|| level_error(var, format!("coordinate '{dim}' has no values")))?;
    let to_pa = to_pascal(coord, levels).map_err(|m| level_error(var, m))?;
    let pa: Vec<f64> = levels.iter().map(|p| to_pa.apply(*p)).collect();

    let weights = bracket(&pa, target_pa).ok_or_else(|| {
        level_error(
            var,
            format!(
                "{hpa} hPa is outside the range of '{dim}' (no extrapolation)"
            ),
        )
    })?;

    let shape = ds.shape(target);
    let outer: usize = shape[..axis].iter().product();
    let n = shape[axis];
    let inner: usize = shape[axis + 1..].iter().product();
    let data = target
        .data
        .as_deref()
        .ok_or_else(|| level_error(var, "variable has no values"))?;
    if data.len() != outer * n * inner {
        return Err(level_error(var, "data length does not match its dimensions"));
    }
    let fill = target.fill_value();
    let is_missing = |x: f64| x.is_nan() || fill.is_some_and(|f| x == f);

    let mut reduced = Vec::with_capacity(outer * inner);
    for o in 0..outer {
        for i in 0..inner {
            let at = |k: usize| data[(o * n + k) * inner + i];
            let value = match weights {
                Bracket::Exact(k) => at(k),
                Bracket::Between { lower, upper, w } => {
                    let (a, b) = (at(lower), at(upper));
                    if is_missing(a) || is_missing(b) {
                        fill.unwrap_or(f64::NAN)
                    } else {
                        a + w * (b - a)
                    }
                }
            };
            reduced.push(value);
        }
    }

    let mut out = ds.clone();
    let scalar_value = to_pa.invert(target_pa);
    let mut scalar = Variable::new(dim.as_str(), &[]).with_data(vec![scalar_value]);
    for (key, value) in &coord.attrs {
        if key != "bounds" {
            scalar.attrs.insert(key.clone(), value.clone());
        }
    }
    let bounds = coord.text_attr("bounds").map(str::to_string);

    out.variables.retain(|name, v| {
        name == var || (!v.dims.contains(&dim) && Some(name.as_str()) != bounds.as_deref())
    });
    out.dims.shift_remove(&dim);
    if let Some(variable) = out.variables.get_mut(var) {
        variable.dims.remove(axis);
        variable.data = Some(reduced);
        let coordinates = match variable.text_attr("coordinates") {
            Some(existing) if existing.split_whitespace().any(|c| c == dim) => existing.to_string(),
            Some(existing) if !existing.trim().is_empty() => format!("{existing} {dim}"),
            _ => dim.clone(),
        };
        variable
            .attrs
            .insert("coordinates".to_string(), AttrValue::Text(coordinates));
    }
    out.variables.insert(dim.clone(), scalar);
    debug!(var, level_hpa = hpa, "extracted pressure level");
    Ok(out)
}

fn existing_scalar_level(ds: &Dataset, var: &str, target: &Variable, target_pa: f64) -> Result<Dataset> {
    let names = target.text_attr("coordinates").unwrap_or_default();
    for name in names.split_whitespace() {
        let Some(coord) = ds.variable(name) else {
            continue;
        };
        if !coord.dims.is_empty() || !is_vertical(coord) {
            continue;
        }
        let Some(&value) = coord.data.as_deref().and_then(|d| d.first()) else {
            continue;
        };
        let to_pa = to_pascal(coord, &[value]).map_err(|m| level_error(var, m))?;
        if close(to_pa.apply(value), target_pa) {
            return Ok(ds.clone());
        }
        return Err(level_error(
            var,
            format!("already reduced to a different level ({value} in '{name}')"),
        ));
    }
    Err(level_error(var, "no vertical coordinate"))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Bracket {
    Exact(usize),
    Between { lower: usize, upper: usize, w: f64 },
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= EXACT_TOLERANCE * b.abs().max(1.0)
}

/// Locate `target` on a monotonic pressure axis. Interpolation weight is
/// linear in log-pressure.
fn bracket(pa: &[f64], target: f64) -> Option<Bracket> {
    if let Some(k) = pa.iter().position(|p| close(*p, target)) {
        return Some(Bracket::Exact(k));
    }
    if target <= 0.0 {
        return None;
    }
    pa.windows(2).enumerate().find_map(|(k, pair)| {
        let (p0, p1) = (pair[0], pair[1]);
        let inside = (p0 < target && target < p1) || (p1 < target && target < p0);
        if !inside || p0 <= 0.0 || p1 <= 0.0 {
            return None;
        }
        let w = (target / p0).ln() / (p1 / p0).ln();
        Some(Bracket::Between {
            lower: k,
            upper: k + 1,
            w,
        })
    })
}
