// Pedantic clippy configuration for ML/data-pipeline code
#![allow(clippy::cast_precision_loss)] // usize→f64/f32 intentional in scoring
#![allow(clippy::cast_possible_truncation)] // usize→u32 in tensor indexing
#![allow(clippy::similar_names)] // related variables like `vp1`/`vp2`
#![allow(clippy::module_name_repetitions)] // CollectOptions in collect.rs is fine
// Documentation pedantic - acceptable for research code:
#![allow(clippy::doc_markdown)] // backticks for every technical term is excessive
#![allow(clippy::missing_errors_doc)] // # Errors section for every Result fn
#![allow(clippy::missing_panics_doc)] // # Panics section for every panic
// Method style pedantic:
#![allow(clippy::must_use_candidate)] // #[must_use] on every pure fn is excessive
#![allow(clippy::trivially_copy_pass_by_ref)] // &self on Copy enums for API consistency

//! rejection-lm: rejection replies to ambiguous coordination
//!
//! Builds stimuli from syntactic items, samples replies from causal language
//! models, coalesces the samples across runs and scores candidate replies
//! (DGRC evaluation) with bag-of-words-corrected log-probabilities.
//!
//! ## Architecture
//!
//! - `items`: seed item table, swap and negation helpers
//! - `stimuli`: arc / coordination stimulus tables with rejection combinations
//! - `prompts`: dialogue templates and chat formats
//! - `collect`: batched sampling and rescoring of continuations
//! - `coalesce`: dedup, ranking and metadata join across sampling runs
//! - `dgrc`: plain and rejection-primed reply scoring
//! - `model`: `LanguageModel` trait and the candle-backed `CausalLm`
//! - `forward_llama`: LLaMA-family decoder forward pass (LLaMA, SmolLM2, Qwen2)
//! - `kv_cache`: KV-cache for incremental decoding
//! - `masks`: causal attention masks
//! - `sampling`: seeded sampler (repetition penalty, temperature, top-k, top-p)
//! - `config`: model stems and default data layout
//! - `io`: CSV / JSON helpers
//! - `error`: typed pipeline errors
//! - `cli`: logging and device setup for the binaries

pub mod cli;
pub mod coalesce;
pub mod collect;
pub mod config;
pub mod dgrc;
pub mod error;
pub mod forward_llama;
pub mod io;
pub mod items;
pub mod kv_cache;
pub mod masks;
pub mod model;
pub mod prompts;
pub mod sampling;
pub mod stimuli;

pub use coalesce::{
    coalesce_all, coalesce_model_dir, read_preprocess, Accumulator, CoalesceOptions, CoalescedRow,
    DedupPolicy, GenerationCondition, RankedContinuation, StimulusMetadata, VpType,
};
pub use collect::{collect_generations, CollectOptions, GenerationResults, SentenceEntry};
pub use config::{DataLayout, ModelRegistry};
pub use dgrc::{evaluate_plain, evaluate_rejection, HeaderScoreRow, RejectionHeader, ScoreRow};
pub use error::PipelineError;
pub use forward_llama::LlamaDecoder;
pub use items::{load_items, reject_sentences, Item};
pub use kv_cache::KvCache;
pub use masks::{causal_mask, clear_mask_cache, decode_mask};
pub use model::{CausalLm, DecoderBackend, LanguageModel, ModelArchitecture};
pub use prompts::{ChatFormat, PromptStyle};
pub use sampling::{GenerationParams, Sampler, DEFAULT_SEED};
pub use stimuli::{build_stimuli, write_stimuli, Construction, StimulusTables};
