//! MDTF Data
//!
//! Everything between a model-data tree and the files a POD reads:
//! cataloging the tree, resolving each POD's varlist against the catalog,
//! and preprocessing the selected chunks into one file per variable.
//!
//! All dataset access goes through [`store::DatasetStore`], so the same code
//! runs against NetCDF files (feature `netcdf`) or the in-memory store.

pub mod catalog;
pub mod dataset;
pub mod preprocess;
pub mod store;
pub mod varlist;

pub use catalog::{Catalog, CatalogBuilder, CatalogEntry, CatalogError, InvalidAsset};
pub use dataset::{AttrValue, Dataset, IntWidth, Variable};
pub use preprocess::{PreprocessError, PreprocessPlan, Preprocessor};
pub use store::{DatasetStore, MemoryStore, StoreError, default_store};
pub use varlist::{Resolution, ResolvedVariable, Resolver, VarStatus};
