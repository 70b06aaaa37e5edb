//! DGRC evaluation: score stored continuations as replies to their preamble
//!
//! The plain evaluator scores each coalesced row once, with the continuation
//! as the reply. The rejection evaluator scores every row twice, prefixing the
//! continuation with each rejection header. Scores always use bag-of-words
//! correction.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::coalesce::{CoalescedRow, GenerationCondition};
use crate::io::CsvRecord;
use crate::model::{prompt_style, LanguageModel};
use crate::prompts::{PromptStyle, HEYWAIT_HEADER, NO_HEADER};
use crate::stimuli::Construction;

/// Output row of the plain evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    pub score: f64,
}

impl CsvRecord for ScoreRow {
    const HEADER: &'static [&'static str] = &["score"];
}

/// Rejection header a reply was primed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectionHeader {
    No,
    Wait,
}

impl RejectionHeader {
    pub const ALL: [RejectionHeader; 2] = [RejectionHeader::No, RejectionHeader::Wait];

    pub fn text(&self) -> &'static str {
        match self {
            RejectionHeader::No => NO_HEADER,
            RejectionHeader::Wait => HEYWAIT_HEADER,
        }
    }
}

/// Output row of the rejection evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderScoreRow {
    pub header: RejectionHeader,
    pub score: f64,
}

impl CsvRecord for HeaderScoreRow {
    const HEADER: &'static [&'static str] = &["header", "score"];
}

/// Prompt with `reply` as what `name2` says back to the preamble
pub fn reply_prompt(row: &CoalescedRow, style: PromptStyle, reply: &str) -> String {
    style.build(&row.name1, &row.name2, &row.preamble, Some(reply))
}

/// One prompt per row, the continuation as the reply
pub fn plain_prompts(rows: &[CoalescedRow], style: PromptStyle) -> Vec<String> {
    rows.iter()
        .map(|row| reply_prompt(row, style, &row.continuation))
        .collect()
}

/// Two prompts per row, `no` then `wait`
pub fn rejection_prompts(rows: &[CoalescedRow], style: PromptStyle) -> Vec<(RejectionHeader, String)> {
    rows.iter()
        .flat_map(|row| {
            RejectionHeader::ALL.into_iter().map(move |header| {
                let reply = format!("{} {}", header.text(), row.continuation);
                (header, reply_prompt(row, style, &reply))
            })
        })
        .collect()
}

/// Score texts in chunks of `batch_size`, with bag-of-words correction
pub fn score_batched(
    model: &dyn LanguageModel,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<f64>> {
    let batch_size = batch_size.max(1);
    let n_batches = texts.len().div_ceil(batch_size);
    let mut scores = Vec::with_capacity(texts.len());
    for (i, batch) in texts.chunks(batch_size).enumerate() {
        debug!("Scoring batch {}/{}", i + 1, n_batches);
        let batch_scores = model.sequence_score(batch, true)?;
        if batch_scores.len() != batch.len() {
            anyhow::bail!(
                "model returned {} scores for {} sequences",
                batch_scores.len(),
                batch.len()
            );
        }
        scores.extend(batch_scores);
    }
    Ok(scores)
}

/// Score each row's continuation as a reply
pub fn evaluate_plain(
    model: &dyn LanguageModel,
    rows: &[CoalescedRow],
    instruct: bool,
    batch_size: usize,
) -> Result<Vec<ScoreRow>> {
    let style = prompt_style(model, instruct)?;
    let prompts = plain_prompts(rows, style);
    if let Some(first) = prompts.first() {
        debug!("First prompt: {:?}", first);
    }
    info!("Scoring {} continuations", prompts.len());

    let scores = score_batched(model, &prompts, batch_size)?;
    Ok(scores.into_iter().map(|score| ScoreRow { score }).collect())
}

/// Score each row's continuation under both rejection headers (2N rows, alternating)
pub fn evaluate_rejection(
    model: &dyn LanguageModel,
    rows: &[CoalescedRow],
    instruct: bool,
    batch_size: usize,
) -> Result<Vec<HeaderScoreRow>> {
    let style = prompt_style(model, instruct)?;
    let (headers, prompts): (Vec<_>, Vec<_>) = rejection_prompts(rows, style).into_iter().unzip();
    info!(
        "Scoring {} rejection replies for {} rows",
        prompts.len(),
        rows.len()
    );

    let scores = score_batched(model, &prompts, batch_size)?;
    Ok(headers
        .into_iter()
        .zip(scores)
        .map(|(header, score)| HeaderScoreRow { header, score })
        .collect())
}

/// `{sorted_dir}/{condition}/{stem}-{mode}.csv`
pub fn eval_input_path(
    sorted_dir: &Path,
    condition: GenerationCondition,
    stem: &str,
    mode: Construction,
) -> PathBuf {
    crate::coalesce::coalesced_path(sorted_dir, condition, stem, mode)
}

/// `{results_dir}/{stem}.csv`
pub fn eval_output_path(results_dir: &Path, stem: &str) -> PathBuf {
    results_dir.join(format!("{stem}.csv"))
}
