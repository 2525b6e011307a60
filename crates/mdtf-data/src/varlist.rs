//! Varlist resolution against a catalog.
//!
//! Each top-level varlist entry is matched by catalog name and frequency;
//! when that fails its alternates are tried in declared order, recursively,
//! and the first success wins. Resolution is a pure function of the
//! catalog, the manifest and the case, so repeated runs select the same
//! rows through the same alternate chain.

use std::collections::HashSet;
use std::fmt;

use mdtf_foundation::{Calendar, ErrorKind, Frequency, Reason, TimeRange};
use mdtf_settings::{Alternate, CaseConfig, PodManifest, VarlistEntry};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CatalogEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VarStatus {
    Found,
    Substituted,
    MissingOptional,
    MissingRequired,
}

impl VarStatus {
    pub fn is_available(self) -> bool {
        matches!(self, VarStatus::Found | VarStatus::Substituted)
    }
}

impl fmt::Display for VarStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VarStatus::Found => "found",
            VarStatus::Substituted => "substituted",
            VarStatus::MissingOptional => "missing-optional",
            VarStatus::MissingRequired => "missing-required",
        })
    }
}

/// Outcome for one top-level varlist entry.
#[derive(Debug, Clone)]
pub struct ResolvedVariable {
    /// The entry as declared; its `var_name` is the in-file name the POD expects
    pub entry: VarlistEntry,
    pub status: VarStatus,
    /// The entry (itself or an alternate) whose rows were selected
    pub selected: Option<VarlistEntry>,
    /// One row per time chunk, sorted by time
    pub rows: Vec<CatalogEntry>,
    /// Every `name@freq` tried, in order
    pub chain: Vec<String>,
    pub reason: Option<Reason>,
}

impl ResolvedVariable {
    /// Mark the variable unavailable after resolution, e.g. when
    /// preprocessing finds the time range is not covered.
    pub fn mark_missing(&mut self, reason: Reason) {
        self.status = if self.entry.required {
            VarStatus::MissingRequired
        } else {
            VarStatus::MissingOptional
        };
        self.reason = Some(reason);
    }
}

/// All varlist entries of one POD for one case.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub pod: String,
    pub case: String,
    pub variables: Vec<ResolvedVariable>,
}

impl Resolution {
    /// First reason that prevents the POD from running.
    pub fn blocking_reason(&self) -> Option<&Reason> {
        self.variables
            .iter()
            .filter(|v| v.status == VarStatus::MissingRequired)
            .find_map(|v| v.reason.as_ref())
    }

    pub fn is_runnable(&self) -> bool {
        self.variables
            .iter()
            .all(|v| v.status != VarStatus::MissingRequired)
    }

    /// Variables that will be handed to the POD.
    pub fn available(&self) -> impl Iterator<Item = &ResolvedVariable> {
        self.variables.iter().filter(|v| v.status.is_available())
    }
}

pub struct Resolver<'a> {
    catalog: &'a Catalog,
    manifest: &'a PodManifest,
    case: &'a CaseConfig,
}

impl<'a> Resolver<'a> {
    pub fn new(catalog: &'a Catalog, manifest: &'a PodManifest, case: &'a CaseConfig) -> Self {
        Self {
            catalog,
            manifest,
            case,
        }
    }

    pub fn resolve(&self) -> Resolution {
        let variables = self
            .manifest
            .varlist
            .iter()
            .map(|entry| self.resolve_entry(entry))
            .collect();
        let resolution = Resolution {
            pod: self.manifest.name.clone(),
            case: self.case.name.clone(),
            variables,
        };
        match resolution.blocking_reason() {
            Some(reason) => info!(pod = %resolution.pod, case = %resolution.case, "{reason}"),
            None => debug!(pod = %resolution.pod, case = %resolution.case, "varlist resolved"),
        }
        resolution
    }

    fn resolve_entry(&self, entry: &VarlistEntry) -> ResolvedVariable {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let found = self.search(entry, &mut visited, &mut chain);

        let mut resolved = ResolvedVariable {
            entry: entry.clone(),
            status: VarStatus::MissingRequired,
            selected: None,
            rows: Vec::new(),
            chain,
            reason: None,
        };
        match found {
            Some((selected, rows)) => {
                if let Some(reason) = missing_units(&self.manifest.name, &selected, &rows) {
                    warn!(pod = %self.manifest.name, var = %entry.var_name, "{reason}");
                    resolved.mark_missing(reason);
                    return resolved;
                }
                resolved.status = if selected == *entry {
                    VarStatus::Found
                } else {
                    VarStatus::Substituted
                };
                debug!(
                    pod = %self.manifest.name,
                    var = %entry.var_name,
                    status = %resolved.status,
                    chain = %resolved.chain.join(" -> "),
                    rows = rows.len(),
                    "resolved"
                );
                resolved.selected = Some(selected);
                resolved.rows = rows;
            }
            None => {
                let message = format!(
                    "POD '{}': no catalog data for '{}' (tried {}) covering {}-{}",
                    self.manifest.name,
                    entry.var_name,
                    resolved.chain.join(", "),
                    self.case.first_year,
                    self.case.last_year
                );
                resolved.mark_missing(Reason::new(ErrorKind::VarlistUnresolved, message));
            }
        }
        resolved
    }

    fn search(
        &self,
        entry: &VarlistEntry,
        visited: &mut HashSet<(String, Frequency)>,
        chain: &mut Vec<String>,
    ) -> Option<(VarlistEntry, Vec<CatalogEntry>)> {
        let key = (entry.catalog_name().to_string(), entry.freq);
        if !visited.insert(key) {
            debug!(var = %entry.var_name, "alternate cycle cut");
            return None;
        }
        chain.push(format!("{}@{}", entry.catalog_name(), entry.freq));

        let rows = self.select_rows(entry);
        if !rows.is_empty() {
            return Some((entry.clone(), rows));
        }
        for alternate in &entry.alternates {
            let candidate = match alternate {
                Alternate::Entry(alt) => alt.as_ref(),
                Alternate::Ref(name) => match self.manifest.entry(name) {
                    Some(target) => target,
                    None => continue,
                },
            };
            if let Some(found) = self.search(candidate, visited, chain) {
                return Some(found);
            }
        }
        None
    }

    /// Candidate rows overlapping the case years, reduced to one
    /// `(variant_label, grid_label)` group and sorted by time.
    ///
    /// A `standard_name` or `realm` in the entry excludes rows that record
    /// a different one.
    fn select_rows(&self, entry: &VarlistEntry) -> Vec<CatalogEntry> {
        let (variable_id, frequency) = (entry.catalog_name(), entry.freq);
        let (first, last) = (self.case.first_year, self.case.last_year);
        let candidates: Vec<&CatalogEntry> = self
            .catalog
            .candidates(variable_id, frequency)
            .into_iter()
            .filter(|row| row.time_range.is_none_or(|r| r.overlaps_years(first, last)))
            .filter(|row| declared_matches(entry.standard_name.as_deref(), &row.standard_name))
            .filter(|row| declared_matches(entry.realm.as_deref(), &row.realm))
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let declared = self.case.variant_label.as_deref();
        let variant = match declared {
            Some(v) if candidates.iter().any(|row| row.variant_label == v) => v.to_string(),
            _ => candidates
                .iter()
                .map(|row| row.variant_label.as_str())
                .min()
                .unwrap_or_default()
                .to_string(),
        };
        let grid = candidates
            .iter()
            .filter(|row| row.variant_label == variant)
            .map(|row| row.grid_label.as_str())
            .min()
            .unwrap_or_default()
            .to_string();

        let mut rows: Vec<CatalogEntry> = candidates
            .into_iter()
            .filter(|row| row.variant_label == variant && row.grid_label == grid)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.time_range
                .map(|r| r.start)
                .cmp(&b.time_range.map(|r| r.start))
                .then_with(|| a.path.cmp(&b.path))
        });
        // Chunks starting at the same instant are a full tie; keep the smallest path.
        rows.dedup_by(|later, kept| {
            later.time_range.map(|r| r.start) == kept.time_range.map(|r| r.start)
        });

        let ranges = || rows.iter().filter_map(|row| row.time_range);
        if let (Some(start), Some(end)) = (ranges().map(|r| r.start).min(), ranges().map(|r| r.end).max()) {
            // Rows carry no calendar. 360-day arithmetic stays within a day
            // of every supported calendar, hence the extra day of slack.
            let span = TimeRange::new(start, end);
            let slack = frequency.nominal_step_seconds() + 86_400;
            if !span.covers_years(first, last, Calendar::Day360, slack) {
                debug!(variable_id, %frequency, have = %span, "catalog rows do not cover the case years");
                return Vec::new();
            }
        }
        rows
    }
}

/// Rows with a blank attribute match any declared value.
fn declared_matches(declared: Option<&str>, row: &str) -> bool {
    match declared {
        Some(want) if !row.trim().is_empty() => row.trim() == want,
        _ => true,
    }
}

fn missing_units(pod: &str, selected: &VarlistEntry, rows: &[CatalogEntry]) -> Option<Reason> {
    selected.units.as_ref()?;
    let row = rows.iter().find(|row| row.units.trim().is_empty())?;
    Some(Reason::new(
        ErrorKind::VarlistUnresolved,
        format!(
            "POD '{pod}': '{}' declares units but {} has none (not in file or field list)",
            selected.var_name,
            row.path.display()
        ),
    ))
}
