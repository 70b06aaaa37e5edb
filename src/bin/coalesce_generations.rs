//! Merge generation runs per model into ranked, metadata-joined CSV tables
//!
//! Usage:
//!   cargo run --release --bin coalesce-generations
//!   cargo run --release --bin coalesce-generations -- --dedup text --sample 5

use anyhow::Result;
use clap::Parser;
use rejection_lm::cli::init_tracing;
use rejection_lm::coalesce::DEFAULT_SAMPLE;
use rejection_lm::config::{
    DEFAULT_GENERATIONS_DIR, DEFAULT_SORTED_DIR, DEFAULT_STIMULI_DIR, DEFAULT_STIMULI_PREFIX,
};
use rejection_lm::{coalesce_all, CoalesceOptions, DedupPolicy, StimulusMetadata};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "coalesce-generations")]
#[command(about = "Dedup, rank and join sampled continuations across runs")]
struct Args {
    /// Directory with one subdirectory of JSON result files per model
    #[arg(long, default_value = DEFAULT_GENERATIONS_DIR)]
    generations_dir: PathBuf,

    /// Directory holding the unique stimulus tables
    #[arg(long, default_value = DEFAULT_STIMULI_DIR)]
    stimuli_dir: PathBuf,

    /// Stimulus table prefix
    #[arg(long, default_value = DEFAULT_STIMULI_PREFIX)]
    prefix: String,

    /// Output root; tables go to <out-dir>/<condition>/<model>-<type>.csv
    #[arg(long, default_value = DEFAULT_SORTED_DIR)]
    out_dir: PathBuf,

    /// Continuations kept per item and verb phrase
    #[arg(long, default_value_t = DEFAULT_SAMPLE)]
    sample: usize,

    /// Duplicate detection: exact (text and score) or text
    #[arg(long, value_enum, default_value_t = DedupPolicy::TextAndScore)]
    dedup: DedupPolicy,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let metadata = StimulusMetadata::load(&args.stimuli_dir, &args.prefix)?;
    let options = CoalesceOptions {
        sample: args.sample,
        dedup: args.dedup,
    };

    let written = coalesce_all(&args.generations_dir, &metadata, &args.out_dir, &options)?;
    info!("Wrote {} coalesced tables", written.len());
    Ok(())
}
