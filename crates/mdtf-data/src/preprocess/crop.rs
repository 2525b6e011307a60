//! Cropping to the case's year range.

use mdtf_foundation::{Frequency, TimeRange};

use super::{PreprocessError, Result};
use crate::dataset::{Dataset, TIME};

/// Keep the time steps whose year lies in `[first, last]`.
///
/// The first and last samples must reach January 1st of `first` and the
/// end of `last` to within one sampling interval; anything shorter is a
/// coverage error, not silently cropped.
pub fn crop_years(var: &str, ds: &Dataset, first: i32, last: i32, frequency: Frequency) -> Result<Dataset> {
    let units = match ds.time_units() {
        Some(units) => units.map_err(|source| PreprocessError::Calendar {
            var: var.to_string(),
            source,
        })?,
        None => return Ok(ds.clone()),
    };
    let values = ds.time_values().unwrap_or_default();
    let (Some(&head), Some(&tail)) = (values.first(), values.last()) else {
        return Err(PreprocessError::Coverage {
            var: var.to_string(),
            have: "no time steps".to_string(),
            first,
            last,
        });
    };
    let range = TimeRange::new(units.decode(head), units.decode(tail));
    if !range.covers_years(first, last, units.calendar, frequency.nominal_step_seconds()) {
        return Err(PreprocessError::Coverage {
            var: var.to_string(),
            have: range.to_string(),
            first,
            last,
        });
    }

    let keep: Vec<usize> = values
        .iter()
        .enumerate()
        .filter(|(_, v)| (first..=last).contains(&units.decode(**v).year))
        .map(|(i, _)| i)
        .collect();
    if keep.len() == values.len() {
        return Ok(ds.clone());
    }

    let steps = values.len();
    let mut out = ds.clone();
    for variable in out.variables.values_mut() {
        if !variable.is_time_dependent() {
            continue;
        }
        let Some(data) = variable.data.take() else {
            continue;
        };
        let stride = data.len() / steps.max(1);
        let mut cropped = Vec::with_capacity(keep.len() * stride);
        for &i in &keep {
            cropped.extend_from_slice(&data[i * stride..(i + 1) * stride]);
        }
        variable.data = Some(cropped);
    }
    out.dims.insert(TIME.to_string(), keep.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Variable;

    /// Two values per month on a 360-day calendar starting in `year`.
    fn monthly(year: i32, months: usize) -> Dataset {
        monthly_from(&format!("{year}-01-01"), months)
    }

    fn monthly_from(reference: &str, months: usize) -> Dataset {
        let times: Vec<f64> = (0..months).map(|m| 15.0 + 30.0 * m as f64).collect();
        let data: Vec<f64> = (0..months * 2).map(|v| v as f64).collect();
        Dataset::new()
            .with_dim("time", months)
            .with_dim("lat", 2)
            .with_variable(
                Variable::new("time", &["time"])
                    .with_attr("units", format!("days since {reference}").as_str())
                    .with_attr("calendar", "360_day")
                    .with_data(times),
            )
            .with_variable(Variable::new("lat", &["lat"]).with_data(vec![-45.0, 45.0]))
            .with_variable(Variable::new("tas", &["time", "lat"]).with_data(data))
    }

    #[test]
    fn crops_whole_years() {
        let out = crop_years("tas", &monthly(1989, 36), 1990, 1990, Frequency::Mon).unwrap();
        assert_eq!(out.dims["time"], 12);
        let tas = out.variable("tas").unwrap().data.as_ref().unwrap();
        assert_eq!(tas.len(), 24);
        assert_eq!(tas[0], 24.0);
        assert_eq!(out.variable("lat").unwrap().data.as_deref(), Some(&[-45.0, 45.0][..]));
    }

    #[test]
    fn already_cropped_is_unchanged() {
        let ds = monthly(1990, 12);
        assert_eq!(crop_years("tas", &ds, 1990, 1990, Frequency::Mon).unwrap(), ds);
    }

    #[test]
    fn partial_coverage_is_an_error() {
        let err = crop_years("tas", &monthly(1990, 24), 1990, 1995, Frequency::Mon).unwrap_err();
        assert!(matches!(err, PreprocessError::Coverage { .. }));
        assert_eq!(err.kind(), mdtf_foundation::ErrorKind::VarlistUnresolved);
    }

    #[test]
    fn half_year_does_not_cover_the_year() {
        let err = crop_years("tas", &monthly_from("1990-07-01", 6), 1990, 1990, Frequency::Mon).unwrap_err();
        assert!(matches!(err, PreprocessError::Coverage { .. }), "{err}");

        let err = crop_years("tas", &monthly(1990, 6), 1990, 1990, Frequency::Mon).unwrap_err();
        assert!(matches!(err, PreprocessError::Coverage { .. }), "{err}");
    }
}
