//! Run the diagnostic framework for a configuration.
//!
//! Usage: `run --config PATH [--overwrite] [--test-mode] [--workers N]`

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use mdtf_foundation::ErrorKind;
use mdtf_runtime::{EXIT_CONFIG, Framework, RealPodSpawner, Shutdown};
use mdtf_settings::{Config, EnvSnapshot, Overrides};

#[derive(Parser, Debug)]
#[command(name = "run")]
#[command(about = "Catalog model data, preprocess it and run the configured PODs")]
struct Args {
    /// Path to the JSONC run configuration
    #[arg(long)]
    config: PathBuf,

    /// Replace an existing output directory
    #[arg(long)]
    overwrite: bool,

    /// Resolve and preprocess, but log POD commands instead of running them
    #[arg(long)]
    test_mode: bool,

    /// Number of PODs to run at once
    #[arg(long)]
    workers: Option<usize>,

    /// Increase logging (repeatable); overrides `settings.verbose`
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let env = EnvSnapshot::capture();

    let config = match Config::load(&args.config, &env) {
        Ok(config) => config.with_overrides(Overrides {
            overwrite: args.overwrite,
            test_mode: args.test_mode,
            workers: args.workers,
        }),
        Err(e) => {
            mdtf_tools::init_logging(1 + args.verbose);
            error!(code = e.kind().code(), "{e}");
            process::exit(EXIT_CONFIG);
        }
    };
    let verbosity = if args.verbose > 0 {
        args.verbose
    } else {
        config.settings.verbose
    };
    mdtf_tools::init_logging(verbosity);

    let store = match mdtf_tools::open_store() {
        Ok(store) => store,
        Err(message) => {
            error!(code = ErrorKind::Filesystem.code(), "{message}");
            process::exit(EXIT_CONFIG);
        }
    };

    let grace = Duration::from_secs(config.settings.grace_period_secs);
    let shutdown = Arc::new(Shutdown::new());
    let _signals = shutdown.listen_for_ctrl_c(grace);

    info!(
        run_id = %config.run_id,
        cases = config.case_list.len(),
        pods = config.pod_list.len(),
        "Starting run"
    );
    let framework = Framework::new(config, env, store, Arc::new(RealPodSpawner));
    match framework.run(shutdown).await {
        Ok(summary) => {
            info!("Report written to {}", summary.output.display());
            process::exit(summary.exit_code());
        }
        Err(e) => {
            error!(code = e.kind().code(), "{e}");
            process::exit(EXIT_CONFIG);
        }
    }
}
