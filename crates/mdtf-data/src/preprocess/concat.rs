//! Joining time chunks along the time axis.

use std::collections::BTreeMap;

use mdtf_foundation::{Frequency, TimeUnits};

use super::{PreprocessError, Result};
use crate::dataset::{Dataset, TIME, TIME_BOUNDS};

/// A junction step above this multiple of the largest in-chunk step is a gap.
const GAP_FACTOR: f64 = 1.5;

struct Chunk {
    dataset: Dataset,
    /// Time values as seconds since the calendar epoch
    seconds: Vec<i64>,
}

fn axis_error(var: &str, detail: impl Into<String>) -> PreprocessError {
    PreprocessError::TimeAxis {
        var: var.to_string(),
        detail: detail.into(),
    }
}

fn units_of(var: &str, ds: &Dataset) -> Result<TimeUnits> {
    match ds.time_units() {
        Some(units) => units.map_err(|source| PreprocessError::Calendar {
            var: var.to_string(),
            source,
        }),
        None => Err(axis_error(var, "chunk without a time coordinate")),
    }
}

/// Names of the variables whose values are time instants.
fn time_encoded(ds: &Dataset) -> Vec<String> {
    let mut names = vec![TIME.to_string()];
    let bounds = ds
        .time()
        .and_then(|t| t.text_attr("bounds"))
        .unwrap_or(TIME_BOUNDS);
    if ds.variables.contains_key(bounds) {
        names.push(bounds.to_string());
    }
    names
}

/// Concatenate `parts` in ascending time order.
///
/// The output is re-encoded in the earliest chunk's time units. Chunks must
/// share a calendar, be strictly increasing inside, and neither overlap nor
/// leave a gap between them.
pub fn concatenate(var: &str, parts: Vec<Dataset>, frequency: Frequency) -> Result<Dataset> {
    let mut chunks = Vec::with_capacity(parts.len());
    for dataset in parts {
        let units = units_of(var, &dataset)?;
        let values = dataset.time_values().unwrap_or_default();
        let seconds = values.iter().map(|v| units.to_epoch_seconds(*v)).collect();
        chunks.push((units, Chunk { dataset, seconds }));
    }
    chunks.retain(|(_, c)| !c.seconds.is_empty());
    if chunks.is_empty() {
        return Err(axis_error(var, "empty time axis"));
    }
    chunks.sort_by_key(|(_, c)| c.seconds[0]);

    let calendar = chunks[0].0.calendar;
    if let Some((units, _)) = chunks.iter().find(|(u, _)| u.calendar != calendar) {
        return Err(axis_error(
            var,
            format!("chunks use different calendars ({calendar} and {})", units.calendar),
        ));
    }

    let grid = spatial_dims(&chunks[0].1.dataset);
    for (_, chunk) in &chunks[1..] {
        let other = spatial_dims(&chunk.dataset);
        if other != grid {
            return Err(PreprocessError::Shape {
                var: var.to_string(),
                detail: format!("{} vs {}", describe(&grid), describe(&other)),
            });
        }
    }

    let mut max_step = 0i64;
    for (_, chunk) in &chunks {
        for pair in chunk.seconds.windows(2) {
            let step = pair[1] - pair[0];
            if step <= 0 {
                return Err(axis_error(var, "time values decrease inside a chunk"));
            }
            max_step = max_step.max(step);
        }
    }
    if max_step == 0 {
        max_step = frequency.nominal_step_seconds();
    }

    for pair in chunks.windows(2) {
        let (prev, next) = (&pair[0].1, &pair[1].1);
        let (end, start) = (prev.seconds[prev.seconds.len() - 1], next.seconds[0]);
        let junction = start - end;
        if junction <= 0 {
            return Err(axis_error(
                var,
                format!(
                    "chunk starting at {} overlaps the previous chunk",
                    calendar.datetime_from_seconds(start)
                ),
            ));
        }
        if junction as f64 > GAP_FACTOR * max_step as f64 {
            return Err(axis_error(
                var,
                format!(
                    "gap between {} and {}",
                    calendar.datetime_from_seconds(end),
                    calendar.datetime_from_seconds(start)
                ),
            ));
        }
    }

    let target_units = chunks[0].0;
    let encoded = time_encoded(&chunks[0].1.dataset);
    let total: usize = chunks.iter().map(|(_, c)| c.seconds.len()).sum();

    let mut iter = chunks.into_iter();
    let Some((_, first)) = iter.next() else {
        return Err(axis_error(var, "empty time axis"));
    };
    let mut out = first.dataset;
    let mut rest: Vec<(TimeUnits, Dataset)> = iter.map(|(u, c)| (u, c.dataset)).collect();

    let names: Vec<String> = out
        .variables
        .values()
        .filter(|v| v.is_time_dependent())
        .map(|v| v.name.clone())
        .collect();
    for name in names {
        let is_time = encoded.contains(&name);
        let Some(variable) = out.variables.get_mut(&name) else {
            continue;
        };
        let mut data = variable.data.take().unwrap_or_default();
        for (units, part) in &mut rest {
            let mut values = part
                .variables
                .get_mut(&name)
                .and_then(|v| v.data.take())
                .ok_or_else(|| axis_error(var, format!("chunk lacks values for '{name}'")))?;
            if is_time {
                rebase(&mut values, units, &target_units);
            }
            data.extend(values);
        }
        variable.data = Some(data);
    }
    out.dims.insert(TIME.to_string(), total);
    Ok(out)
}

/// Every dimension but time, by name.
fn spatial_dims(ds: &Dataset) -> BTreeMap<&str, usize> {
    ds.dims
        .iter()
        .filter(|(name, _)| name.as_str() != TIME)
        .map(|(name, len)| (name.as_str(), *len))
        .collect()
}

fn describe(dims: &BTreeMap<&str, usize>) -> String {
    let parts: Vec<String> = dims.iter().map(|(name, len)| format!("{name}={len}")).collect();
    format!("[{}]", parts.join(", "))
}

fn rebase(values: &mut [f64], from: &TimeUnits, to: &TimeUnits) {
    for v in values {
        *v = to.from_epoch_seconds(from.to_epoch_seconds(*v));
    }
}
