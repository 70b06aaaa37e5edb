//! Build arc / coordination stimulus tables from the seed item CSV
//!
//! Usage:
//!   cargo run --release --bin build-stimuli
//!   cargo run --release --bin build-stimuli -- --items data/pilot_items.csv --prefix pilot

use anyhow::Result;
use clap::Parser;
use rejection_lm::cli::init_tracing;
use rejection_lm::config::{DEFAULT_ITEMS, DEFAULT_STIMULI_DIR, DEFAULT_STIMULI_PREFIX};
use rejection_lm::{build_stimuli, load_items, write_stimuli};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "build-stimuli")]
#[command(about = "Expand seed items into unique and rejection stimulus tables")]
struct Args {
    /// Seed item table (subj, vp1, vp2, verb1, verb2, prn, name1, name2)
    #[arg(long, default_value = DEFAULT_ITEMS)]
    items: PathBuf,

    /// Output directory for the four stimulus tables
    #[arg(long, default_value = DEFAULT_STIMULI_DIR)]
    out_dir: PathBuf,

    /// File name prefix, e.g. `kim22` -> `kim22-arc-unique.csv`
    #[arg(long, default_value = DEFAULT_STIMULI_PREFIX)]
    prefix: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let items = load_items(&args.items)?;
    let tables = build_stimuli(&items);
    for path in write_stimuli(&tables, &args.out_dir, &args.prefix)? {
        info!("Wrote {}", path.display());
    }
    Ok(())
}
