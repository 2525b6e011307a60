//! MDTF Tools
//!
//! Shared setup for the `build-catalog` and `run` binaries.

use std::sync::Arc;

use mdtf_data::{DatasetStore, StoreError, default_store};
use tracing_subscriber::{EnvFilter, fmt};

/// The store the binaries read and write NetCDF through.
///
/// A build without the `netcdf` feature cannot open any model data, so the
/// error says how to get one that can.
pub fn open_store() -> Result<Arc<dyn DatasetStore>, String> {
    default_store().map_err(|e| match e {
        StoreError::Unsupported => "this binary was built without NetCDF support; rebuild with \
             `cargo build -p mdtf-tools --features netcdf` (needs libnetcdf) or \
             `--features netcdf-static` (builds libnetcdf from source)"
            .to_string(),
        e => e.to_string(),
    })
}

/// Default filter for a verbosity level: 0 warn, 1 info, 2 debug, 3+ trace.
pub fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "info,mdtf_settings=debug,mdtf_data=debug,mdtf_runtime=debug,mdtf_tools=debug",
        _ => "trace",
    }
}

/// Initialize logging.
///
/// Use `RUST_LOG` environment variable to override the default filter.
pub fn init_logging(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(default_filter(0), "warn");
        assert_eq!(default_filter(1), "info");
        assert!(default_filter(2).contains("mdtf_data=debug"));
        assert_eq!(default_filter(9), "trace");
    }

    #[cfg(not(feature = "netcdf"))]
    #[test]
    fn store_without_netcdf_explains_the_rebuild() {
        let message = open_store().err().unwrap();
        assert!(message.contains("--features netcdf"));
    }
}
