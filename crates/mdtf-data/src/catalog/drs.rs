//! Directory-DRS path parser.
//!
//! Layout: `…/<realm>/<analysis>/<frequency>/<chunk>/<realm>.<dates>.<var>.nc`,
//! for example `atmos_cmip/ts/monthly/5yr/atmos_cmip.199001-199412.tas.nc`.

use std::path::{Component, Path};

use mdtf_foundation::Frequency;

use super::builder::Identity;

/// Parse `path` (relative to the catalog root) into the identity columns.
///
/// Errors are human-readable reasons for an invalid asset.
pub fn identify(relative: &Path) -> Result<Identity, String> {
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();
    if parts.len() < 5 {
        return Err(format!(
            "expected <realm>/<analysis>/<frequency>/<chunk>/<file>, got {} path segment(s)",
            parts.len()
        ));
    }
    let n = parts.len();
    let (file, chunk, freq_segment, realm_dir) =
        (parts[n - 1], parts[n - 2], parts[n - 3], parts[n - 5]);

    let frequency = Frequency::from_path_segment(freq_segment)
        .ok_or_else(|| format!("unrecognized frequency directory '{freq_segment}'"))?;
    if !is_chunk(chunk) {
        return Err(format!("unrecognized chunk directory '{chunk}'"));
    }

    let stem = file
        .strip_suffix(".nc")
        .ok_or_else(|| format!("'{file}' is not a .nc file"))?;
    let fields: Vec<&str> = stem.split('.').collect();
    let [realm, dates, variable] = fields[..] else {
        return Err(format!(
            "file name '{file}' is not <realm>.<dates>.<variable>.nc"
        ));
    };
    if realm.is_empty() || variable.is_empty() {
        return Err(format!("file name '{file}' has an empty realm or variable"));
    }
    if !is_date_span(dates) {
        return Err(format!("unparseable date span '{dates}' in '{file}'"));
    }
    if realm != realm_dir {
        tracing::debug!(file, realm_dir, "file realm differs from its directory");
    }

    Ok(Identity {
        realm: realm.to_string(),
        variable_id: variable.to_string(),
        frequency,
        chunk_freq: chunk.to_string(),
    })
}

/// `5yr`, `1yr`, `10yr`, `6mo`, `1dy`.
fn is_chunk(segment: &str) -> bool {
    let digits = segment.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && matches!(&segment[digits..], "yr" | "mo" | "dy" | "hr")
}

/// `1990-1994`, `199001-199412`, `19900101-19941231`, `1990010100-1994123123`.
fn is_date_span(dates: &str) -> bool {
    let Some((start, end)) = dates.split_once('-') else {
        return false;
    };
    let ok = |d: &str| d.len() >= 4 && d.len() <= 10 && d.bytes().all(|b| b.is_ascii_digit());
    ok(start) && ok(end) && start.len() == end.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_monthly_timeseries() {
        let id = identify(Path::new(
            "CM4_hist/atmos_cmip/ts/monthly/5yr/atmos_cmip.199001-199412.tas.nc",
        ))
        .unwrap();
        assert_eq!(id.realm, "atmos_cmip");
        assert_eq!(id.variable_id, "tas");
        assert_eq!(id.frequency, Frequency::Mon);
        assert_eq!(id.chunk_freq, "5yr");
    }

    #[test]
    fn frequency_synonyms() {
        let id = identify(Path::new("atmos/ts/daily/1yr/atmos.19900101-19901231.pr.nc")).unwrap();
        assert_eq!(id.frequency, Frequency::Day);
        let id = identify(Path::new("atmos/av/yearly/10yr/atmos.1990-1999.ts.nc")).unwrap();
        assert_eq!(id.frequency, Frequency::Annual);
    }

    #[test]
    fn malformed_paths_explain_themselves() {
        let err = identify(Path::new("atmos/ts/weekly/5yr/atmos.1990-1994.tas.nc")).unwrap_err();
        assert!(err.contains("weekly"));
        let err = identify(Path::new("atmos/ts/monthly/5yr/tas.nc")).unwrap_err();
        assert!(err.contains("tas.nc"));
        let err = identify(Path::new("monthly/5yr/atmos.1990-1994.tas.nc")).unwrap_err();
        assert!(err.contains("segment"));
        let err = identify(Path::new("atmos/ts/monthly/5yr/atmos.1990-94.tas.nc")).unwrap_err();
        assert!(err.contains("date span"));
    }
}
