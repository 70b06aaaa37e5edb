//! Generation collection: sample continuations for every item and verb phrase
//!
//! Each item yields two prompts (`"{subj} {vp1}"` and `"{subj} {vp2}"`),
//! rendered either as a narrated dialogue or in the model's chat format. Items
//! are processed in batches; the sampling seed is applied once per batch and
//! verb phrase, so identical batching reproduces identical samples. Every
//! sampled continuation is rescored as prompt + continuation.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::items::Item;
use crate::model::{prompt_style, LanguageModel};
use crate::prompts::{join_continuation, PromptStyle};
use crate::sampling::{GenerationParams, DEFAULT_SEED};

/// Continuations sampled for one item, each with its sequence score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceEntry {
    pub idx: usize,
    pub sentences: Vec<(String, f64)>,
}

/// The JSON document written by one collection run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResults {
    pub model: String,
    pub instruct: bool,
    pub top_p: Option<f64>,
    pub top_k: usize,
    pub temperature: f64,
    pub num_generations: usize,
    pub max_gen: usize,
    pub response: Option<String>,
    pub generation_vp1: Vec<SentenceEntry>,
    pub generation_vp2: Vec<SentenceEntry>,
}

/// Settings for [`collect_generations`]
#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub params: GenerationParams,
    pub batch_size: usize,
    pub instruct: bool,
    /// Reply prefix; `Some` puts the run in the rejection condition
    pub response: Option<String>,
    pub seed: u64,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            params: GenerationParams::default(),
            batch_size: 8,
            instruct: false,
            response: None,
            seed: DEFAULT_SEED,
        }
    }
}

impl CollectOptions {
    pub fn condition(&self) -> &'static str {
        if self.response.is_some() {
            "rejection"
        } else {
            "freeform"
        }
    }

    /// File name the coalescer recognises, e.g. `freeform_pnone_k0_t1.json`
    pub fn default_output_name(&self) -> String {
        let top_p = self
            .params
            .top_p
            .map_or_else(|| "none".to_string(), |p| p.to_string());
        format!(
            "{}_p{}_k{}_t{}.json",
            self.condition(),
            top_p,
            self.params.top_k,
            self.params.temperature
        )
    }
}

/// The two prompts built for one item
#[derive(Debug, Clone, PartialEq)]
pub struct ItemPrompts {
    pub idx: usize,
    pub vp1: String,
    pub vp2: String,
}

/// Build the vp1/vp2 prompts for every item (ids are 1-based positions)
pub fn build_prompts(items: &[Item], style: PromptStyle, response: Option<&str>) -> Vec<ItemPrompts> {
    let render = |item: &Item, vp: &str| {
        let sentence = format!("{} {}", item.subj, vp);
        let utterance = match style {
            PromptStyle::Chat(_) => format!("{sentence}."),
            PromptStyle::Dialogue => sentence,
        };
        style.build(&item.name1, &item.name2, &utterance, response)
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| ItemPrompts {
            idx: i + 1,
            vp1: render(item, &item.vp1),
            vp2: render(item, &item.vp2),
        })
        .collect()
}

/// Sample continuations for a batch of prompts and score each joined sequence
pub fn generate_and_score(
    model: &dyn LanguageModel,
    prompts: &[String],
    params: &GenerationParams,
    seed: u64,
) -> Result<Vec<Vec<(String, f64)>>> {
    let generations = model.generate(prompts, params, seed)?;
    if generations.len() != prompts.len() {
        anyhow::bail!(
            "model returned {} generation lists for {} prompts",
            generations.len(),
            prompts.len()
        );
    }

    let mut scored = Vec::with_capacity(prompts.len());
    for (prompt, continuations) in prompts.iter().zip(generations) {
        if continuations.is_empty() {
            scored.push(Vec::new());
            continue;
        }
        let joined: Vec<String> = continuations
            .iter()
            .map(|c| join_continuation(prompt, c))
            .collect();
        let scores = model.sequence_score(&joined, false)?;
        scored.push(continuations.into_iter().zip(scores).collect());
    }
    Ok(scored)
}

/// Run the full collection over `items`
pub fn collect_generations(
    model: &dyn LanguageModel,
    items: &[Item],
    options: &CollectOptions,
) -> Result<GenerationResults> {
    let style = prompt_style(model, options.instruct)?;
    let prompts = build_prompts(items, style, options.response.as_deref());
    let batch_size = options.batch_size.max(1);
    let n_batches = prompts.len().div_ceil(batch_size);

    info!(
        "Collecting {} generations for {} items ({} batches, condition {})",
        options.params.num_generations,
        items.len(),
        n_batches,
        options.condition()
    );

    let mut results = GenerationResults {
        model: model.model_id().to_string(),
        instruct: options.instruct,
        top_p: options.params.top_p,
        top_k: options.params.top_k,
        temperature: options.params.temperature,
        num_generations: options.params.num_generations,
        max_gen: options.params.max_new_tokens,
        response: options.response.clone(),
        generation_vp1: Vec::with_capacity(items.len()),
        generation_vp2: Vec::with_capacity(items.len()),
    };

    for (batch_idx, batch) in prompts.chunks(batch_size).enumerate() {
        info!("Batch {}/{}", batch_idx + 1, n_batches);

        let vp1: Vec<String> = batch.iter().map(|p| p.vp1.clone()).collect();
        let vp2: Vec<String> = batch.iter().map(|p| p.vp2.clone()).collect();
        let scored1 = generate_and_score(model, &vp1, &options.params, options.seed)?;
        let scored2 = generate_and_score(model, &vp2, &options.params, options.seed)?;

        if batch_idx == 0 {
            if let Some(first) = scored1.first() {
                debug!("First item samples: {:?}", first);
            }
        }

        for (prompt, sentences) in batch.iter().zip(scored1) {
            results.generation_vp1.push(SentenceEntry {
                idx: prompt.idx,
                sentences,
            });
        }
        for (prompt, sentences) in batch.iter().zip(scored2) {
            results.generation_vp2.push(SentenceEntry {
                idx: prompt.idx,
                sentences,
            });
        }
    }

    Ok(results)
}
