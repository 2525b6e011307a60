//! Stable error classification.
//!
//! Every reportable failure in the framework maps onto one [`ErrorKind`].
//! The kind carries a stable code (`E001`..`E008`) that appears in logs,
//! run records and the HTML report, so downstream tooling can match on it
//! without parsing messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a reportable framework error.
///
/// # Invariant
///
/// The discriminant values must match the `ERROR_KIND_NAMES` and
/// `ERROR_KIND_CODES` array indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorKind {
    /// Malformed JSONC in a settings, manifest or field-list file.
    ConfigSyntax = 0,
    /// Well-formed input that violates the expected schema.
    ConfigSchema = 1,
    /// A single catalog asset could not be parsed (accumulated, non-fatal).
    CatalogParse = 2,
    /// A required varlist entry could not be matched (POD skipped).
    VarlistUnresolved = 3,
    /// Preprocessing of one variable failed (POD skipped).
    Preprocess = 4,
    /// The POD's interpreter environment does not exist (POD skipped).
    EnvironmentNotFound = 5,
    /// The POD driver exited non-zero, was signalled or timed out.
    PodExecution = 6,
    /// Framework-owned filesystem operation failed (fatal).
    Filesystem = 7,
}

const ERROR_KIND_NAMES: &[&str] = &[
    "ConfigSyntaxError",   // 0
    "ConfigSchemaError",   // 1
    "CatalogParseError",   // 2
    "VarlistUnresolved",   // 3
    "PreprocessError",     // 4
    "EnvironmentNotFound", // 5
    "PODExecutionError",   // 6
    "FilesystemError",     // 7
];

const ERROR_KIND_CODES: &[&str] = &["E001", "E002", "E003", "E004", "E005", "E006", "E007", "E008"];

impl ErrorKind {
    /// Human-readable name, e.g. `ConfigSyntaxError`.
    pub fn name(self) -> &'static str {
        ERROR_KIND_NAMES[self as usize]
    }

    /// Stable code, e.g. `E001`.
    pub fn code(self) -> &'static str {
        ERROR_KIND_CODES[self as usize]
    }

    /// Fatal kinds abort the run (after a partial report).
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::ConfigSyntax | ErrorKind::ConfigSchema | ErrorKind::Filesystem
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.name())
    }
}

/// Structured explanation attached to a skipped or failed run record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub kind: ErrorKind,
    /// Stable code duplicated for consumers that only read JSON.
    pub code: String,
    /// Message naming the artifact that caused the failure.
    pub message: String,
}

impl Reason {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code().to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.kind.name(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorKind::ConfigSyntax.code(), "E001");
        assert_eq!(ErrorKind::PodExecution.code(), "E007");
        assert_eq!(ErrorKind::Filesystem.code(), "E008");
        assert_eq!(ErrorKind::PodExecution.name(), "PODExecutionError");
    }

    #[test]
    fn reason_display_mentions_code_and_message() {
        let reason = Reason::new(ErrorKind::Preprocess, "pr: bad units");
        assert_eq!(reason.to_string(), "[E005] PreprocessError: pr: bad units");
    }

    #[test]
    fn fatal_kinds() {
        assert!(ErrorKind::ConfigSchema.is_fatal());
        assert!(!ErrorKind::VarlistUnresolved.is_fatal());
    }
}
