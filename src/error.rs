//! Typed failures for the stimulus / generation / scoring pipeline
//!
//! Most functions return `anyhow::Result`; these variants cover the
//! data-integrity and setup problems callers may want to match on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A generation refers to an item that has no stimulus metadata row.
    #[error("item {item} has generations but no metadata row in the {construction} table")]
    MissingItemMetadata { item: usize, construction: String },

    /// Instruct-mode prompting was requested for a model without a known chat format.
    #[error("model '{model_id}' has no recognised chat format; run without --instruct")]
    MissingChatFormat { model_id: String },

    /// A batch with no prompts reached the model.
    #[error("empty batch passed to {operation}")]
    EmptyBatch { operation: &'static str },

    /// Device string could not be parsed.
    #[error("invalid device '{0}' (expected cpu, cuda, cuda:N or metal)")]
    InvalidDevice(String),
}
