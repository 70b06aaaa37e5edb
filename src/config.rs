//! Model naming and default data layout
//!
//! Output files are keyed by a short per-model "stem" (e.g.
//! `smollm2-360m-instruct`). Stems come from an optional JSON registry
//! mapping model ids to stems; unregistered models fall back to the id with
//! `/` replaced by `_`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_ITEMS: &str = "data/kim22_used_items.csv";
pub const DEFAULT_STIMULI_DIR: &str = "data/stimuli";
pub const DEFAULT_STIMULI_PREFIX: &str = "kim22";
pub const DEFAULT_GENERATIONS_DIR: &str = "data/results/generations";
pub const DEFAULT_SORTED_DIR: &str = "data/results/sorted-generations";
pub const DEFAULT_DGRC_DIR: &str = "data/results/dgrc";

/// Map from model id to output file stem
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ModelRegistry {
    stems: BTreeMap<String, String>,
}

impl ModelRegistry {
    /// Load a JSON object `{"org/model": "stem", ...}`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model registry {}", path.display()))?;
        let registry: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid model registry {}", path.display()))?;
        debug!("Loaded {} model stems from {}", registry.stems.len(), path.display());
        Ok(registry)
    }

    /// Registry from an optional path; no path means fallback stems only
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Stem for a model id
    pub fn file_stem(&self, model_id: &str) -> String {
        self.stems
            .get(model_id)
            .cloned()
            .unwrap_or_else(|| model_id.replace('/', "_"))
    }
}

/// Root locations of the pipeline's inputs and outputs
#[derive(Debug, Clone, PartialEq)]
pub struct DataLayout {
    pub items: PathBuf,
    pub stimuli_dir: PathBuf,
    pub stimuli_prefix: String,
    pub generations_dir: PathBuf,
    pub sorted_dir: PathBuf,
    pub dgrc_dir: PathBuf,
}

impl Default for DataLayout {
    fn default() -> Self {
        Self {
            items: DEFAULT_ITEMS.into(),
            stimuli_dir: DEFAULT_STIMULI_DIR.into(),
            stimuli_prefix: DEFAULT_STIMULI_PREFIX.into(),
            generations_dir: DEFAULT_GENERATIONS_DIR.into(),
            sorted_dir: DEFAULT_SORTED_DIR.into(),
            dgrc_dir: DEFAULT_DGRC_DIR.into(),
        }
    }
}

impl DataLayout {
    /// Directory holding one model's generation files
    pub fn model_generations_dir(&self, stem: &str) -> PathBuf {
        self.generations_dir.join(stem)
    }

    /// Default DGRC results directory, e.g. `data/results/dgrc/rejection-arc`
    pub fn dgrc_results_dir(&self, condition: &str, mode: &str) -> PathBuf {
        self.dgrc_dir.join(format!("{condition}-{mode}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_stem() {
        let registry = ModelRegistry::default();
        assert_eq!(
            registry.file_stem("HuggingFaceTB/SmolLM2-360M-Instruct"),
            "HuggingFaceTB_SmolLM2-360M-Instruct"
        );
    }

    #[test]
    fn test_registry_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");
        std::fs::write(
            &path,
            r#"{"meta-llama/Meta-Llama-3-8B-Instruct": "llama3-8b-instruct"}"#,
        )
        .unwrap();

        let registry = ModelRegistry::load_optional(Some(path.as_path())).unwrap();
        assert_eq!(
            registry.file_stem("meta-llama/Meta-Llama-3-8B-Instruct"),
            "llama3-8b-instruct"
        );
        assert_eq!(registry.file_stem("org/other"), "org_other");
    }

    #[test]
    fn test_registry_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(ModelRegistry::load(&path).is_err());
    }

    #[test]
    fn test_layout_defaults() {
        let layout = DataLayout::default();
        assert_eq!(
            layout.model_generations_dir("smollm2"),
            PathBuf::from("data/results/generations/smollm2")
        );
        assert_eq!(
            layout.dgrc_results_dir("freeform", "arc"),
            PathBuf::from("data/results/dgrc/freeform-arc")
        );
        assert_eq!(layout.stimuli_prefix, DEFAULT_STIMULI_PREFIX);
    }
}
