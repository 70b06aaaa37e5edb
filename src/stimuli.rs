//! Stimulus tables: arc / coordination sentences crossed with rejection phrases
//!
//! For every item and construction this produces two "unique" rows (normal and
//! swapped verb-phrase order) and 32 rejection rows (16 No/Wait combinations
//! for each swap state).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::io::CsvRecord;
use crate::items::Item;

/// Denial phrases, crossed with [`WAIT`] in NO-major order
pub const NO: [&str; 4] = ["No.", "That's not true.", "I doubt that.", "I don't think so."];

/// Interruption phrases
pub const WAIT: [&str; 4] = ["Wait no.", "Hey, wait a minute.", "Hold on.", "Hang on, hang on."];

/// Sentence construction for the two verb phrases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Construction {
    /// "Subject, who VP1, VP2."
    Arc,
    /// "Subject VP1 and VP2."
    Coord,
}

impl Construction {
    pub const ALL: [Construction; 2] = [Construction::Arc, Construction::Coord];

    pub fn as_str(&self) -> &'static str {
        match self {
            Construction::Arc => "arc",
            Construction::Coord => "coord",
        }
    }

    /// Render the sentence for an item
    pub fn render(&self, item: &Item) -> String {
        match self {
            Construction::Arc => format!("{}, who {}, {}.", item.subj, item.vp1, item.vp2),
            Construction::Coord => format!("{} {} and {}.", item.subj, item.vp1, item.vp2),
        }
    }
}

impl fmt::Display for Construction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Booleans written the way the downstream analysis expects them (`True` / `False`)
pub(crate) mod title_bool {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "True" } else { "False" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "True" | "true" => Ok(true),
            "False" | "false" => Ok(false),
            other => Err(D::Error::custom(format!("expected True/False, got '{other}'"))),
        }
    }
}

/// One sentence per (item, swap state); the metadata the coalescer joins against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueStimulus {
    pub item: usize,
    #[serde(with = "title_bool")]
    pub swapped: bool,
    #[serde(rename = "type")]
    pub construction: Construction,
    pub name1: String,
    pub name2: String,
    pub preamble: String,
}

impl CsvRecord for UniqueStimulus {
    const HEADER: &'static [&'static str] =
        &["item", "swapped", "type", "name1", "name2", "preamble"];
}

/// A sentence paired with one No/Wait rejection combination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionStimulus {
    pub idx: usize,
    pub item: usize,
    pub rejection_id: usize,
    #[serde(with = "title_bool")]
    pub swapped: bool,
    #[serde(rename = "type")]
    pub construction: Construction,
    pub name1: String,
    pub name2: String,
    pub preamble: String,
    pub no: String,
    pub wait: String,
    pub continuation1: String,
    pub continuation2: String,
}

impl CsvRecord for RejectionStimulus {
    const HEADER: &'static [&'static str] = &[
        "idx",
        "item",
        "rejection_id",
        "swapped",
        "type",
        "name1",
        "name2",
        "preamble",
        "no",
        "wait",
        "continuation1",
        "continuation2",
    ];
}

/// Unique and rejection rows for one construction
#[derive(Debug, Clone, Default)]
pub struct ConstructionTable {
    pub unique: Vec<UniqueStimulus>,
    pub rejection: Vec<RejectionStimulus>,
}

/// Output of [`build_stimuli`]
#[derive(Debug, Clone, Default)]
pub struct StimulusTables {
    pub arc: ConstructionTable,
    pub coord: ConstructionTable,
}

impl StimulusTables {
    pub fn get(&self, construction: Construction) -> &ConstructionTable {
        match construction {
            Construction::Arc => &self.arc,
            Construction::Coord => &self.coord,
        }
    }

    fn get_mut(&mut self, construction: Construction) -> &mut ConstructionTable {
        match construction {
            Construction::Arc => &mut self.arc,
            Construction::Coord => &mut self.coord,
        }
    }
}

/// All 16 (No, Wait) combinations; the position is the rejection id
pub fn rejection_combos() -> Vec<(&'static str, &'static str)> {
    NO.iter()
        .flat_map(|&no| WAIT.iter().map(move |&wait| (no, wait)))
        .collect()
}

/// Expand items into arc and coordination stimulus tables
///
/// The sequential `idx` is global across items and shared by both
/// constructions: each combination takes two consecutive values, the normal
/// row first and the swapped row second.
pub fn build_stimuli(items: &[Item]) -> StimulusTables {
    let combos = rejection_combos();
    let mut tables = StimulusTables::default();
    let mut idx = 1;

    for (i, item) in items.iter().enumerate() {
        let item_id = i + 1;
        let swapped_item = item.swapped();
        let (continuation1, continuation2) = item.rejections();

        for construction in Construction::ALL {
            let table = tables.get_mut(construction);
            for (swapped, source) in [(false, item), (true, &swapped_item)] {
                table.unique.push(UniqueStimulus {
                    item: item_id,
                    swapped,
                    construction,
                    name1: source.name1.clone(),
                    name2: source.name2.clone(),
                    preamble: construction.render(source),
                });
            }
        }

        for (rejection_id, (no, wait)) in combos.iter().enumerate() {
            for construction in Construction::ALL {
                let table = tables.get_mut(construction);
                let normal = construction.render(item);
                let swapped = construction.render(&swapped_item);

                table.rejection.push(RejectionStimulus {
                    idx,
                    item: item_id,
                    rejection_id,
                    swapped: false,
                    construction,
                    name1: item.name1.clone(),
                    name2: item.name2.clone(),
                    preamble: normal,
                    no: (*no).to_string(),
                    wait: (*wait).to_string(),
                    continuation1: continuation1.clone(),
                    continuation2: continuation2.clone(),
                });
                table.rejection.push(RejectionStimulus {
                    idx: idx + 1,
                    item: item_id,
                    rejection_id,
                    swapped: true,
                    construction,
                    name1: swapped_item.name1.clone(),
                    name2: swapped_item.name2.clone(),
                    preamble: swapped,
                    no: (*no).to_string(),
                    wait: (*wait).to_string(),
                    continuation1: continuation2.clone(),
                    continuation2: continuation1.clone(),
                });
            }
            idx += 2;
        }
    }

    info!(
        "Built stimuli for {} items: {} unique / {} rejection rows per construction",
        items.len(),
        tables.arc.unique.len(),
        tables.arc.rejection.len()
    );
    tables
}

/// Path of the unique table for a construction, e.g. `data/stimuli/kim22-arc-unique.csv`
pub fn unique_table_path(dir: &Path, prefix: &str, construction: Construction) -> PathBuf {
    dir.join(format!("{prefix}-{construction}-unique.csv"))
}

/// Path of the rejection table for a construction
pub fn rejection_table_path(dir: &Path, prefix: &str, construction: Construction) -> PathBuf {
    dir.join(format!("{prefix}-{construction}-rejection.csv"))
}

/// Write the four stimulus tables and return their paths
pub fn write_stimuli(tables: &StimulusTables, dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(4);
    for construction in Construction::ALL {
        let table = tables.get(construction);

        let unique_path = unique_table_path(dir, prefix, construction);
        crate::io::write_csv(&unique_path, &table.unique)?;
        written.push(unique_path);

        let rejection_path = rejection_table_path(dir, prefix, construction);
        crate::io::write_csv(&rejection_path, &table.rejection)?;
        written.push(rejection_path);
    }
    Ok(written)
}

/// Load a unique stimulus table written by [`write_stimuli`]
pub fn load_unique_table(path: impl AsRef<Path>) -> Result<Vec<UniqueStimulus>> {
    crate::io::read_csv(path)
}
