//! Build a data catalog for a model-output tree.
//!
//! Usage: `build-catalog --root DIR --style {drs,filename} --out PATH [--field-list PATH]`

use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};

use mdtf_data::CatalogBuilder;
use mdtf_foundation::ErrorKind;
use mdtf_runtime::EXIT_CONFIG;
use mdtf_settings::{CatalogStyle, EnvSnapshot, FieldList};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Style {
    /// `<root>/<realm>/<freq>/<chunk>/<realm>.<dates>.<var>.nc`
    Drs,
    /// Identity from global attributes in each file
    Filename,
}

impl From<Style> for CatalogStyle {
    fn from(style: Style) -> Self {
        match style {
            Style::Drs => CatalogStyle::Drs,
            Style::Filename => CatalogStyle::Filename,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "build-catalog")]
#[command(about = "Scan a model-data tree and write a CSV catalog with its JSON schema")]
struct Args {
    /// Root of the model-data tree
    #[arg(long)]
    root: PathBuf,

    /// How assets are identified
    #[arg(long, value_enum, default_value = "drs")]
    style: Style,

    /// Catalog CSV to write; the schema goes next to it as `.json`
    #[arg(long)]
    out: PathBuf,

    /// Field list used to fill standard names, long names and units
    #[arg(long)]
    field_list: Option<PathBuf>,

    /// Increase logging (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();
    mdtf_tools::init_logging(1 + args.verbose);

    let store = match mdtf_tools::open_store() {
        Ok(store) => store,
        Err(message) => {
            error!(code = ErrorKind::Filesystem.code(), "{message}");
            process::exit(EXIT_CONFIG);
        }
    };

    let mut builder = CatalogBuilder::new(&args.root, args.style.into(), store);
    if let Some(path) = &args.field_list {
        match FieldList::load(path, &EnvSnapshot::capture()) {
            Ok(field_list) => builder = builder.with_field_list(field_list),
            Err(e) => {
                error!(code = e.kind().code(), "{e}");
                process::exit(EXIT_CONFIG);
            }
        }
    }

    let catalog = match builder.build() {
        Ok(catalog) => catalog,
        Err(e) => {
            error!(code = e.kind().code(), "{e}");
            process::exit(EXIT_CONFIG);
        }
    };
    if let Err(e) = catalog.write(&args.out) {
        error!(code = e.kind().code(), "{e}");
        process::exit(EXIT_CONFIG);
    }

    if !catalog.invalid().is_empty() {
        warn!("{} asset(s) could not be cataloged", catalog.invalid().len());
    }
    info!(
        "Wrote {} entries to {}",
        catalog.len(),
        args.out.display()
    );
}
