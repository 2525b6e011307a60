//! MDTF Settings
//!
//! Loading of everything the framework reads before touching data: the
//! run configuration, POD manifests and catalog field lists. All three are
//! JSONC with `${NAME}` substitution from an environment snapshot.

pub mod config;
pub mod error;
pub mod fieldlist;
pub mod jsonc;
pub mod manifest;
pub mod source;
pub mod subst;

pub use config::{
    CaseConfig, CatalogStyle, Config, EnvManagerKind, EnvironmentSettings, OutputEscapePolicy,
    Overrides, Paths, RunSettings,
};
pub use error::{Result, SettingsError};
pub use fieldlist::{FieldEntry, FieldList};
pub use manifest::{Alternate, PodManifest, PodSettings, VarlistEntry};
pub use subst::EnvSnapshot;
