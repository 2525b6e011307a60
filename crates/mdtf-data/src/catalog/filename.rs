//! Attribute-driven parser for trees whose paths carry no metadata.
//!
//! Identity comes from CMIP6-style global attributes. `variable_id` falls
//! back to the file's single data variable.

use mdtf_foundation::Frequency;

use super::builder::Identity;
use crate::dataset::Dataset;

pub fn identify(header: &Dataset) -> Result<Identity, String> {
    let variable_id = match header.global_text("variable_id") {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => {
            let data: Vec<&str> = header.data_variables().map(|v| v.name.as_str()).collect();
            match data[..] {
                [single] => single.to_string(),
                [] => return Err("no data variable and no variable_id attribute".to_string()),
                _ => {
                    return Err(format!(
                        "no variable_id attribute and {} data variables ({})",
                        data.len(),
                        data.join(", ")
                    ));
                }
            }
        }
    };

    let raw_freq = header
        .global_text("frequency")
        .ok_or_else(|| "missing frequency global attribute".to_string())?;
    let frequency: Frequency = raw_freq.parse().map_err(|e| format!("{e}"))?;

    Ok(Identity {
        realm: header.global_text("realm").unwrap_or_default().to_string(),
        variable_id,
        frequency,
        chunk_freq: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Variable;

    fn file(attrs: &[(&str, &str)], vars: &[&str]) -> Dataset {
        let mut ds = Dataset::new().with_dim("time", 1).with_variable(
            Variable::new("time", &["time"]).with_attr("units", "days since 2000-01-01"),
        );
        for (k, v) in attrs {
            ds = ds.with_attr(k, *v);
        }
        for name in vars {
            ds = ds.with_variable(Variable::new(*name, &["time"]));
        }
        ds
    }

    #[test]
    fn attributes_win() {
        let ds = file(&[("variable_id", "pr"), ("frequency", "day"), ("realm", "atmos")], &["pr"]);
        let id = identify(&ds).unwrap();
        assert_eq!(id.variable_id, "pr");
        assert_eq!(id.frequency, Frequency::Day);
        assert_eq!(id.realm, "atmos");
    }

    #[test]
    fn falls_back_to_single_data_variable() {
        let ds = file(&[("frequency", "monthly")], &["tas"]);
        assert_eq!(identify(&ds).unwrap().variable_id, "tas");

        let ds = file(&[("frequency", "mon")], &["tas", "pr"]);
        assert!(identify(&ds).unwrap_err().contains("tas, pr"));
    }

    #[test]
    fn frequency_is_required() {
        let ds = file(&[("variable_id", "pr")], &["pr"]);
        assert!(identify(&ds).unwrap_err().contains("frequency"));
        let ds = file(&[("variable_id", "pr"), ("frequency", "fx")], &["pr"]);
        assert!(identify(&ds).unwrap_err().contains("fx"));
    }
}
