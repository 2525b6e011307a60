//! Unit conversion of a data variable.

use mdtf_foundation::units;
use tracing::{debug, warn};

use super::{PreprocessError, Result};
use crate::dataset::{AttrValue, Dataset};

/// Convert `var` to `target` in place.
///
/// Values equal to the fill value and NaNs are left alone. When the units
/// only differ in spelling, just the attribute is rewritten. A variable
/// without a `units` attribute is skipped with a warning.
pub fn convert_units(ds: &mut Dataset, var: &str, target: &str) -> Result<()> {
    let Some(variable) = ds.variables.get_mut(var) else {
        return Err(PreprocessError::NoSuchVariable {
            var: var.to_string(),
        });
    };
    let Some(current) = variable.text_attr("units").map(str::to_string) else {
        warn!(var, target, "no units attribute, skipping conversion");
        return Ok(());
    };
    if current == target {
        return Ok(());
    }

    let conversion = units::conversion(&current, target).map_err(|source| PreprocessError::Units {
        var: var.to_string(),
        source,
    })?;
    if !conversion.is_identity() {
        let fill = variable.fill_value();
        if let Some(data) = variable.data.as_mut() {
            for x in data.iter_mut() {
                if x.is_nan() || fill.is_some_and(|f| *x == f) {
                    continue;
                }
                *x = conversion.apply(*x);
            }
        }
        for key in ["valid_min", "valid_max", "valid_range"] {
            let Some(values) = variable.attrs.get(key).and_then(AttrValue::as_numbers) else {
                continue;
            };
            let converted: Vec<f64> = values.into_iter().map(|v| conversion.apply(v)).collect();
            let value = match converted.as_slice() {
                [x] => AttrValue::Number(*x),
                _ => AttrValue::Numbers(converted),
            };
            variable.attrs.insert(key.to_string(), value);
        }
    }
    debug!(var, from = %current, to = target, factor = conversion.factor, "converted units");
    variable
        .attrs
        .insert("units".to_string(), AttrValue::Text(target.to_string()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Variable;

    fn height(units: Option<&str>) -> Dataset {
        let mut var = Variable::new("zg", &["x"])
            .with_attr("long_name", "geopotential height")
            .with_attr("_FillValue", 1.0e20)
            .with_data(vec![1.5, 1.0e20, f64::NAN]);
        if let Some(u) = units {
            var = var.with_attr("units", u);
        }
        Dataset::new().with_dim("x", 3).with_variable(var)
    }

    #[test]
    fn metres_to_centimetres() {
        let mut ds = height(Some("m"));
        convert_units(&mut ds, "zg", "cm").unwrap();
        let zg = ds.variable("zg").unwrap();
        let data = zg.data.as_ref().unwrap();
        assert!((data[0] - 150.0).abs() < 1e-9);
        assert_eq!(data[1], 1.0e20);
        assert!(data[2].is_nan());
        assert_eq!(zg.text_attr("units"), Some("cm"));
        assert_eq!(zg.text_attr("long_name"), Some("geopotential height"));
    }

    #[test]
    fn equivalent_spelling_only_rewrites_the_attribute() {
        let mut ds = height(Some("m s-1"));
        convert_units(&mut ds, "zg", "m/s").unwrap();
        let zg = ds.variable("zg").unwrap();
        assert_eq!(zg.data.as_ref().unwrap()[0], 1.5);
        assert_eq!(zg.text_attr("units"), Some("m/s"));
    }

    #[test]
    fn missing_units_are_skipped() {
        let mut ds = height(None);
        let before = ds.clone();
        convert_units(&mut ds, "zg", "cm").unwrap();
        assert_eq!(ds, before);
    }

    #[test]
    fn valid_range_follows_the_data() {
        let mut ds = height(Some("m"));
        if let Some(zg) = ds.variables.get_mut("zg") {
            zg.attrs.insert("valid_range".into(), AttrValue::Floats(vec![0.0, 2.0]));
        }
        convert_units(&mut ds, "zg", "cm").unwrap();
        let range = ds.variable("zg").unwrap().attrs.get("valid_range").cloned();
        assert_eq!(range, Some(AttrValue::Numbers(vec![0.0, 200.0])));
    }

    #[test]
    fn incompatible_units_fail() {
        let mut ds = height(Some("K"));
        let err = convert_units(&mut ds, "zg", "cm").unwrap_err();
        assert!(matches!(err, PreprocessError::Units { .. }));
    }
}
