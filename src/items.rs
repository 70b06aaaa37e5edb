//! Seed items: one syntactic test case per row of the item table

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// A single syntactic item
///
/// Identity is the 1-based row position in the seed table; the struct itself
/// carries no id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub subj: String,
    pub vp1: String,
    pub vp2: String,
    pub verb1: String,
    pub verb2: String,
    pub prn: String,
    pub name1: String,
    pub name2: String,
}

impl Item {
    /// Same item with the two verb phrases (and their verbs) exchanged.
    ///
    /// Subject, pronoun and names are untouched, so swapping twice is the identity.
    pub fn swapped(&self) -> Self {
        Self {
            subj: self.subj.clone(),
            vp1: self.vp2.clone(),
            vp2: self.vp1.clone(),
            verb1: self.verb2.clone(),
            verb2: self.verb1.clone(),
            prn: self.prn.clone(),
            name1: self.name1.clone(),
            name2: self.name2.clone(),
        }
    }

    /// Negated continuations for both verbs, e.g. ("She likes not", "She hates not")
    pub fn rejections(&self) -> (String, String) {
        let (c1, c2) = reject_sentences(&self.verb1, &self.verb2, &self.prn);
        (capitalize(&c1), capitalize(&c2))
    }
}

/// Load the seed item table (`subj, vp1, vp2, verb1, verb2, prn, name1, name2`)
pub fn load_items(path: impl AsRef<Path>) -> Result<Vec<Item>> {
    let path = path.as_ref();
    let items: Vec<Item> = crate::io::read_csv(path)?;
    info!("Loaded {} items from {}", items.len(), path.display());
    Ok(items)
}

/// `"{prn} {verb} not"` for each verb
pub fn reject_sentences(verb1: &str, verb2: &str, prn: &str) -> (String, String) {
    (format!("{prn} {verb1} not"), format!("{prn} {verb2} not"))
}

/// Upper-case the first character and lower-case the rest
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

#[cfg(test)]
pub(crate) fn sample_item() -> Item {
    Item {
        subj: "The teacher".into(),
        vp1: "likes the student".into(),
        vp2: "hates the principal".into(),
        verb1: "likes".into(),
        verb2: "hates".into(),
        prn: "she".into(),
        name1: "Mary".into(),
        name2: "John".into(),
    }
}
