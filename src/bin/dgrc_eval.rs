//! DGRC evaluation: score freeform continuations as replies to their preamble
//!
//! Usage:
//!   cargo run --release --features cuda --bin dgrc-eval -- --instruct
//!   cargo run --release --bin dgrc-eval -- --model HuggingFaceTB/SmolLM2-360M --device cpu --mode coord

use anyhow::{Context, Result};
use clap::Parser;
use rejection_lm::cli::{init_tracing, parse_device};
use rejection_lm::coalesce::CoalescedRow;
use rejection_lm::config::{DataLayout, ModelRegistry, DEFAULT_SORTED_DIR};
use rejection_lm::dgrc::{eval_input_path, eval_output_path};
use rejection_lm::{evaluate_plain, CausalLm, Construction, GenerationCondition};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "dgrc-eval")]
#[command(about = "Score coalesced freeform continuations with bag-of-words correction")]
struct Args {
    /// HuggingFace model ID
    #[arg(long, default_value = "meta-llama/Meta-Llama-3-8B-Instruct")]
    model: String,

    /// Output directory (default: data/results/dgrc/freeform-<mode>)
    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// Root of the coalesced tables
    #[arg(long, default_value = DEFAULT_SORTED_DIR)]
    sorted_dir: PathBuf,

    /// Construction to evaluate
    #[arg(long, value_enum, default_value_t = Construction::Arc)]
    mode: Construction,

    /// Sequences per scoring batch
    #[arg(long, default_value = "8")]
    batch_size: usize,

    /// Use the model's chat format instead of the dialogue template
    #[arg(long)]
    instruct: bool,

    /// Device: cpu, cuda, cuda:N or metal
    #[arg(long, default_value = "cuda:0")]
    device: String,

    /// JSON map from model ID to output file stem
    #[arg(long)]
    model_registry: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let condition = GenerationCondition::Freeform;
    let registry = ModelRegistry::load_optional(args.model_registry.as_deref())?;
    let stem = registry.file_stem(&args.model);

    let input = eval_input_path(&args.sorted_dir, condition, &stem, args.mode);
    let rows: Vec<CoalescedRow> = rejection_lm::io::read_csv(&input)
        .with_context(|| format!("Failed to load {}", input.display()))?;
    info!("Loaded {} rows from {}", rows.len(), input.display());

    let device = parse_device(&args.device)?;
    let model = CausalLm::from_pretrained(&args.model, device)?;
    let scores = evaluate_plain(&model, &rows, args.instruct, args.batch_size)?;

    let results_dir = args.results_dir.clone().unwrap_or_else(|| {
        DataLayout::default().dgrc_results_dir(condition.as_str(), args.mode.as_str())
    });
    let output = eval_output_path(&results_dir, &stem);
    rejection_lm::io::write_csv(&output, &scores)?;
    info!("Scores saved to {}", output.display());
    Ok(())
}
