//! Collect sampled continuations from a language model
//!
//! Two prompt styles: chat markup for instruct-tuned models (`--instruct`) and
//! a narrated dialogue otherwise. Two conditions: freeform (no reply prefix)
//! and rejection (`--response "No, that's not true!"`). Results are written
//! as one JSON file.
//!
//! Usage:
//!   cargo run --release --bin collect-generations -- --instruct
//!   cargo run --release --bin collect-generations -- --instruct --response "No, that's not true!"
//!   cargo run --release --features cuda --bin collect-generations -- --device cuda:0 -p 0.9

use anyhow::Result;
use clap::Parser;
use rejection_lm::cli::{init_tracing, parse_device};
use rejection_lm::config::{DataLayout, ModelRegistry, DEFAULT_ITEMS};
use rejection_lm::{collect_generations, load_items, CausalLm, CollectOptions, GenerationParams};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "collect-generations")]
#[command(about = "Sample and score continuations for every item and verb phrase")]
struct Args {
    /// HuggingFace model ID
    #[arg(long, default_value = "HuggingFaceTB/SmolLM2-360M-Instruct")]
    model: String,

    /// Items per generation batch (the seed is re-applied per batch)
    #[arg(long, default_value = "8")]
    batch_size: usize,

    /// Device: cpu, cuda, cuda:N or metal
    #[arg(long, default_value = "cpu")]
    device: String,

    /// Continuations sampled per prompt
    #[arg(long, default_value = "10")]
    num_gen: usize,

    /// Maximum new tokens per continuation
    #[arg(long, default_value = "20")]
    max_gen: usize,

    /// Nucleus mass (-1 disables top-p)
    #[arg(long, short = 'p', default_value = "-1", allow_negative_numbers = true)]
    topp: f64,

    /// Top-k cutoff (0 disables)
    #[arg(long, short = 'k', default_value = "0")]
    topk: usize,

    /// Sampling temperature
    #[arg(long, short = 't', default_value = "1.0")]
    temp: f64,

    /// Repetition penalty applied to already-seen tokens
    #[arg(long, default_value = "1.2")]
    repetition_penalty: f32,

    /// Seed applied at the start of every batch
    #[arg(long, default_value_t = rejection_lm::DEFAULT_SEED)]
    seed: u64,

    /// Use the model's chat format instead of the dialogue template
    #[arg(long)]
    instruct: bool,

    /// Reply prefix (rejection condition)
    #[arg(long)]
    response: Option<String>,

    /// Output directory (default: data/results/generations/<model stem>)
    #[arg(long)]
    outdir: Option<PathBuf>,

    /// Output file name (default derived from condition and decoding parameters)
    #[arg(long)]
    outfile: Option<String>,

    /// Seed item table
    #[arg(long, default_value = DEFAULT_ITEMS)]
    analysis_data: PathBuf,

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

    let registry = ModelRegistry::load_optional(args.model_registry.as_deref())?;
    let stem = registry.file_stem(&args.model);

    let options = CollectOptions {
        params: GenerationParams {
            num_generations: args.num_gen,
            max_new_tokens: args.max_gen,
            top_p: (args.topp >= 0.0).then_some(args.topp),
            top_k: args.topk,
            temperature: args.temp,
            repetition_penalty: args.repetition_penalty,
        },
        batch_size: args.batch_size,
        instruct: args.instruct,
        response: args.response.clone(),
        seed: args.seed,
    };

    let outdir = args
        .outdir
        .clone()
        .unwrap_or_else(|| DataLayout::default().model_generations_dir(&stem));
    let outfile = args
        .outfile
        .clone()
        .unwrap_or_else(|| options.default_output_name());

    let items = load_items(&args.analysis_data)?;
    let device = parse_device(&args.device)?;
    let model = CausalLm::from_pretrained(&args.model, device)?;

    let results = collect_generations(&model, &items, &options)?;

    let path = outdir.join(outfile);
    rejection_lm::io::write_json(&path, &results)?;
    info!("Results saved to {}", path.display());
    Ok(())
}
