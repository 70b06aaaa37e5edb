//! Coalescing of generation runs into ranked, metadata-joined CSV tables
//!
//! All JSON result files of one model are merged per condition (freeform or
//! rejection), deduplicated, sorted by score and truncated to the top
//! `sample` continuations per (verb phrase, item). The survivors are joined
//! against the unique stimulus tables, fanning out to every metadata row of
//! the item (both swap states).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::collect::GenerationResults;
use crate::error::PipelineError;
use crate::io::CsvRecord;
use crate::stimuli::{load_unique_table, unique_table_path, Construction, UniqueStimulus};

/// Continuations kept per (verb phrase, item) by default
pub const DEFAULT_SAMPLE: usize = 10;

/// Sampling condition, recovered from a result file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GenerationCondition {
    Freeform,
    Rejection,
}

impl GenerationCondition {
    pub const ALL: [GenerationCondition; 2] =
        [GenerationCondition::Freeform, GenerationCondition::Rejection];

    /// Classify a JSON file name; `freeform` is checked before `rejection`
    pub fn from_file_name(name: &str) -> Option<Self> {
        if !name.contains("json") {
            return None;
        }
        if name.contains("freeform") {
            Some(GenerationCondition::Freeform)
        } else if name.contains("rejection") {
            Some(GenerationCondition::Rejection)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationCondition::Freeform => "freeform",
            GenerationCondition::Rejection => "rejection",
        }
    }
}

impl fmt::Display for GenerationCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which verb phrase a continuation responds to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpType {
    Vp1,
    Vp2,
}

/// How duplicate continuations are recognised across runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DedupPolicy {
    /// Identical text and identical score
    #[default]
    #[value(name = "exact")]
    TextAndScore,
    /// Identical text; the first-seen score is kept
    #[value(name = "text")]
    TextOnly,
}

/// `vp_type -> item id -> [(text, score)]`
pub type Preprocessed = BTreeMap<VpType, BTreeMap<usize, Vec<(String, f64)>>>;

/// Group a result document by verb phrase and item id; repeated ids are concatenated
pub fn preprocess(results: &GenerationResults) -> Preprocessed {
    let mut out = Preprocessed::new();
    for (vp, entries) in [
        (VpType::Vp1, &results.generation_vp1),
        (VpType::Vp2, &results.generation_vp2),
    ] {
        let groups = out.entry(vp).or_default();
        for entry in entries {
            groups
                .entry(entry.idx)
                .or_default()
                .extend(entry.sentences.iter().cloned());
        }
    }
    out
}

/// Read and group one result file; `None` (already logged) when unreadable
pub fn read_preprocess(path: impl AsRef<Path>) -> Option<Preprocessed> {
    crate::io::read_json::<GenerationResults>(path).map(|results| preprocess(&results))
}

/// One continuation after ranking
#[derive(Debug, Clone, PartialEq)]
pub struct RankedContinuation {
    pub item: usize,
    pub continuation_type: VpType,
    /// 1-based rank by descending score
    pub continuation_id: usize,
    pub continuation: String,
    pub score: f64,
}

/// Deduplicating collector for one condition of one model
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    policy: DedupPolicy,
    groups: Preprocessed,
    seen: HashSet<(VpType, usize, String, Option<u64>)>,
}

impl Accumulator {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    fn key(&self, vp: VpType, item: usize, text: &str, score: f64) -> (VpType, usize, String, Option<u64>) {
        let score_bits = match self.policy {
            DedupPolicy::TextAndScore => Some(score.to_bits()),
            DedupPolicy::TextOnly => None,
        };
        (vp, item, text.to_string(), score_bits)
    }

    pub fn add(&mut self, preprocessed: Preprocessed) {
        for (vp, groups) in preprocessed {
            for (item, sentences) in groups {
                for (text, score) in sentences {
                    let key = self.key(vp, item, &text, score);
                    if self.seen.insert(key) {
                        self.groups
                            .entry(vp)
                            .or_default()
                            .entry(item)
                            .or_default()
                            .push((text, score));
                    }
                }
            }
        }
    }

    /// Distinct continuations collected so far
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Sort each group by score (descending, ties by text) and keep the top `sample`.
    ///
    /// Output order: vp1 before vp2, item id ascending, rank ascending.
    pub fn into_ranked(self, sample: usize) -> Vec<RankedContinuation> {
        let mut ranked = Vec::new();
        for (vp, groups) in self.groups {
            for (item, mut sentences) in groups {
                sentences.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                sentences.truncate(sample);
                for (rank, (text, score)) in sentences.into_iter().enumerate() {
                    ranked.push(RankedContinuation {
                        item,
                        continuation_type: vp,
                        continuation_id: rank + 1,
                        continuation: text.trim().to_string(),
                        score,
                    });
                }
            }
        }
        ranked
    }
}

/// A unique stimulus row extended with one ranked continuation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoalescedRow {
    pub item: usize,
    #[serde(with = "crate::stimuli::title_bool")]
    pub swapped: bool,
    #[serde(rename = "type")]
    pub construction: Construction,
    pub name1: String,
    pub name2: String,
    pub preamble: String,
    pub continuation_type: VpType,
    pub continuation_id: usize,
    pub continuation: String,
}

impl CsvRecord for CoalescedRow {
    const HEADER: &'static [&'static str] = &[
        "item",
        "swapped",
        "type",
        "name1",
        "name2",
        "preamble",
        "continuation_type",
        "continuation_id",
        "continuation",
    ];
}

/// Fan each ranked continuation out to every metadata row of its item
pub fn join_metadata(
    ranked: &[RankedContinuation],
    metadata: &[UniqueStimulus],
    construction: Construction,
) -> Result<Vec<CoalescedRow>> {
    let mut by_item: BTreeMap<usize, Vec<&UniqueStimulus>> = BTreeMap::new();
    for row in metadata {
        by_item.entry(row.item).or_default().push(row);
    }

    let mut rows = Vec::new();
    for cont in ranked {
        let entries = by_item
            .get(&cont.item)
            .ok_or_else(|| PipelineError::MissingItemMetadata {
                item: cont.item,
                construction: construction.to_string(),
            })?;
        for meta in entries {
            rows.push(CoalescedRow {
                item: meta.item,
                swapped: meta.swapped,
                construction: meta.construction,
                name1: meta.name1.clone(),
                name2: meta.name2.clone(),
                preamble: meta.preamble.clone(),
                continuation_type: cont.continuation_type,
                continuation_id: cont.continuation_id,
                continuation: cont.continuation.clone(),
            });
        }
    }
    Ok(rows)
}

/// Unique stimulus tables for both constructions
#[derive(Debug, Clone, Default)]
pub struct StimulusMetadata {
    pub arc: Vec<UniqueStimulus>,
    pub coord: Vec<UniqueStimulus>,
}

impl StimulusMetadata {
    /// Load `{prefix}-arc-unique.csv` and `{prefix}-coord-unique.csv` from `dir`
    pub fn load(dir: &Path, prefix: &str) -> Result<Self> {
        let arc_path = unique_table_path(dir, prefix, Construction::Arc);
        let coord_path = unique_table_path(dir, prefix, Construction::Coord);
        Ok(Self {
            arc: load_unique_table(&arc_path)
                .with_context(|| format!("Failed to load {}", arc_path.display()))?,
            coord: load_unique_table(&coord_path)
                .with_context(|| format!("Failed to load {}", coord_path.display()))?,
        })
    }

    pub fn get(&self, construction: Construction) -> &[UniqueStimulus] {
        match construction {
            Construction::Arc => &self.arc,
            Construction::Coord => &self.coord,
        }
    }
}

/// Settings for a coalescing run
#[derive(Debug, Clone, Copy)]
pub struct CoalesceOptions {
    pub sample: usize,
    pub dedup: DedupPolicy,
}

impl Default for CoalesceOptions {
    fn default() -> Self {
        Self {
            sample: DEFAULT_SAMPLE,
            dedup: DedupPolicy::default(),
        }
    }
}

/// Output path `{out_dir}/{condition}/{model}-{construction}.csv`
pub fn coalesced_path(
    out_dir: &Path,
    condition: GenerationCondition,
    model: &str,
    construction: Construction,
) -> PathBuf {
    out_dir
        .join(condition.as_str())
        .join(format!("{model}-{construction}.csv"))
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

/// Coalesce every result file of one model directory; returns written paths
pub fn coalesce_model_dir(
    model_dir: &Path,
    metadata: &StimulusMetadata,
    out_dir: &Path,
    options: &CoalesceOptions,
) -> Result<Vec<PathBuf>> {
    let model = model_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("No directory name in {}", model_dir.display()))?;

    let mut accumulators: BTreeMap<GenerationCondition, (Accumulator, usize)> = BTreeMap::new();
    for path in sorted_entries(model_dir)? {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let Some(condition) = GenerationCondition::from_file_name(&name) else {
            continue;
        };
        let Some(preprocessed) = read_preprocess(&path) else {
            continue;
        };
        let (acc, files) = accumulators
            .entry(condition)
            .or_insert_with(|| (Accumulator::new(options.dedup), 0));
        acc.add(preprocessed);
        *files += 1;
    }

    let mut written = Vec::new();
    for condition in GenerationCondition::ALL {
        let Some((acc, files)) = accumulators.remove(&condition) else {
            warn!("Model {}: no {} generation files, skipping", model, condition);
            continue;
        };
        let distinct = acc.len();
        let ranked = acc.into_ranked(options.sample);

        for construction in Construction::ALL {
            let rows = join_metadata(&ranked, metadata.get(construction), construction)?;
            let path = coalesced_path(out_dir, condition, &model, construction);
            crate::io::write_csv(&path, &rows)?;
            info!(
                "Model: {}. {} {}: {} files, {} distinct, {} rows",
                model,
                condition,
                construction,
                files,
                distinct,
                rows.len()
            );
            written.push(path);
        }
    }
    Ok(written)
}

/// Coalesce every model subdirectory of `generations_dir`
pub fn coalesce_all(
    generations_dir: &Path,
    metadata: &StimulusMetadata,
    out_dir: &Path,
    options: &CoalesceOptions,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for path in sorted_entries(generations_dir)? {
        if path.is_dir() {
            written.extend(coalesce_model_dir(&path, metadata, out_dir, options)?);
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn group(vp: VpType, item: usize, sentences: &[(&str, f64)]) -> Preprocessed {
        let mut out = Preprocessed::new();
        out.entry(vp).or_default().insert(
            item,
            sentences.iter().map(|(t, s)| ((*t).to_string(), *s)).collect(),
        );
        out
    }

    fn meta(item: usize, swapped: bool) -> UniqueStimulus {
        UniqueStimulus {
            item,
            swapped,
            construction: Construction::Arc,
            name1: "Mary".into(),
            name2: "John".into(),
            preamble: format!("Sentence {item}."),
        }
    }

    #[test]
    fn test_condition_from_file_name() {
        assert_eq!(
            GenerationCondition::from_file_name("freeform_pnone_k0_t1.json"),
            Some(GenerationCondition::Freeform)
        );
        assert_eq!(
            GenerationCondition::from_file_name("rejection_p0.9_k0_t1.json"),
            Some(GenerationCondition::Rejection)
        );
        // freeform wins when both appear
        assert_eq!(
            GenerationCondition::from_file_name("freeform-vs-rejection.json"),
            Some(GenerationCondition::Freeform)
        );
        assert_eq!(GenerationCondition::from_file_name("freeform.csv"), None);
        assert_eq!(GenerationCondition::from_file_name("gens_0_0_1-0.json"), None);
    }

    #[test]
    fn test_exact_dedup() {
        let mut acc = Accumulator::new(DedupPolicy::TextAndScore);
        acc.add(group(VpType::Vp1, 1, &[("a", -1.0), ("b", -2.0)]));
        acc.add(group(VpType::Vp1, 1, &[("a", -1.0), ("a", -1.5)]));
        assert_eq!(acc.len(), 3);

        let ranked = acc.into_ranked(10);
        let texts: Vec<_> = ranked.iter().map(|r| r.continuation.as_str()).collect();
        assert_eq!(texts, vec!["a", "a", "b"]);
    }

    #[test]
    fn test_text_only_dedup_keeps_first_score() {
        let mut acc = Accumulator::new(DedupPolicy::TextOnly);
        acc.add(group(VpType::Vp1, 1, &[("a", -1.0)]));
        acc.add(group(VpType::Vp1, 1, &[("a", -0.5)]));
        let ranked = acc.into_ranked(10);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].score, -1.0);
    }

    #[test]
    fn test_ranking_order_and_trim() {
        let mut acc = Accumulator::new(DedupPolicy::default());
        acc.add(group(VpType::Vp2, 2, &[(" low ", -3.0), ("high", -0.5)]));
        acc.add(group(VpType::Vp1, 5, &[("z", -1.0), ("y", -1.0)]));
        acc.add(group(VpType::Vp1, 1, &[("only", -9.0)]));

        let ranked = acc.into_ranked(10);
        let summary: Vec<_> = ranked
            .iter()
            .map(|r| (r.continuation_type, r.item, r.continuation_id, r.continuation.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (VpType::Vp1, 1, 1, "only"),
                (VpType::Vp1, 5, 1, "y"),
                (VpType::Vp1, 5, 2, "z"),
                (VpType::Vp2, 2, 1, "high"),
                (VpType::Vp2, 2, 2, "low"),
            ]
        );
    }

    #[test]
    fn test_join_fans_out_to_swap_states() {
        let mut acc = Accumulator::new(DedupPolicy::default());
        acc.add(group(VpType::Vp1, 1, &[("Really?", -1.0)]));
        let ranked = acc.into_ranked(10);

        let metadata = vec![meta(1, false), meta(1, true), meta(2, false)];
        let rows = join_metadata(&ranked, &metadata, Construction::Arc).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(!rows[0].swapped && rows[1].swapped);
        assert_eq!(rows[1].continuation, "Really?");
        assert_eq!(rows[1].continuation_type, VpType::Vp1);
    }

    #[test]
    fn test_join_missing_item_is_fatal() {
        let mut acc = Accumulator::new(DedupPolicy::default());
        acc.add(group(VpType::Vp1, 3, &[("x", -1.0)]));
        let ranked = acc.into_ranked(10);

        let err = join_metadata(&ranked, &[meta(1, false)], Construction::Coord).unwrap_err();
        let pipeline = err.downcast_ref::<PipelineError>().unwrap();
        assert!(matches!(
            pipeline,
            PipelineError::MissingItemMetadata { item: 3, .. }
        ));
    }

    #[test]
    fn test_coalesced_row_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        let row = CoalescedRow {
            item: 1,
            swapped: false,
            construction: Construction::Coord,
            name1: "Mary".into(),
            name2: "John".into(),
            preamble: "P.".into(),
            continuation_type: VpType::Vp2,
            continuation_id: 1,
            continuation: "Sure.".into(),
        };
        crate::io::write_csv(&path, &[row.clone()]).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(
            "item,swapped,type,name1,name2,preamble,continuation_type,continuation_id,continuation\n"
        ));
        assert!(content.contains("1,False,coord,Mary,John,P.,vp2,1,Sure."));

        let back: Vec<CoalescedRow> = crate::io::read_csv(&path).unwrap();
        assert_eq!(back, vec![row]);
    }

    proptest! {
        #[test]
        fn prop_ranked_groups_sorted_and_bounded(
            entries in prop::collection::vec(
                (1usize..4, "[a-d]{1,3}", -20i32..0),
                0..60
            ),
            sample in 1usize..8,
        ) {
            let mut acc = Accumulator::new(DedupPolicy::TextAndScore);
            for (item, text, score) in &entries {
                acc.add(group(VpType::Vp1, *item, &[(text.as_str(), f64::from(*score))]));
            }
            let ranked = acc.into_ranked(sample);

            let mut by_item: BTreeMap<usize, Vec<&RankedContinuation>> = BTreeMap::new();
            for r in &ranked {
                by_item.entry(r.item).or_default().push(r);
            }
            for rows in by_item.values() {
                prop_assert!(rows.len() <= sample);
                for (i, r) in rows.iter().enumerate() {
                    prop_assert_eq!(r.continuation_id, i + 1);
                }
                for pair in rows.windows(2) {
                    prop_assert!(pair[0].score >= pair[1].score);
                }
                let distinct: HashSet<_> = rows
                    .iter()
                    .map(|r| (r.continuation.clone(), r.score.to_bits()))
                    .collect();
                prop_assert_eq!(distinct.len(), rows.len());
            }
        }
    }
}
