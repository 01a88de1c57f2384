//! # Tag Vocabulary
//!
//! Bijective mapping between tag names and dense tag indices. Every
//! vocabulary carries the two sentinel tags `START` and `STOP`; they own a
//! row and a column of the transition matrix but never appear in
//! ground-truth label sequences.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SeqCrfError};

/// Name of the start sentinel tag.
pub const START_TAG: &str = "START";
/// Name of the stop sentinel tag.
pub const STOP_TAG: &str = "STOP";

/// Fixed tag vocabulary for the lifetime of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, usize>", into = "BTreeMap<String, usize>")]
pub struct TagVocabulary {
    names: Vec<String>,
    index: HashMap<String, usize>,
    start: usize,
    stop: usize,
}

impl TagVocabulary {
    /// Build a vocabulary from a `{name -> index}` mapping.
    ///
    /// Indices must be dense and 0-based, and both sentinels must be present
    /// alongside at least one real tag.
    pub fn new<I, S>(mapping: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        let mut index = HashMap::new();
        for (name, idx) in mapping {
            let name = name.into();
            if index.insert(name.clone(), idx).is_some() {
                return Err(SeqCrfError::InvalidVocabulary(format!(
                    "duplicate tag name {name:?}"
                )));
            }
        }

        let mut slots: Vec<Option<String>> = vec![None; index.len()];
        for (name, &idx) in &index {
            let slot = slots.get_mut(idx).ok_or_else(|| {
                SeqCrfError::InvalidVocabulary(format!(
                    "index {idx} of tag {name:?} is not dense (vocabulary has {} tags)",
                    index.len()
                ))
            })?;
            if let Some(other) = slot.replace(name.clone()) {
                return Err(SeqCrfError::InvalidVocabulary(format!(
                    "tags {other:?} and {name:?} share index {idx}"
                )));
            }
        }
        // Every slot is filled: len(index) names landed on distinct indices in 0..len.
        let names: Vec<String> = slots.into_iter().flatten().collect();

        let start = *index
            .get(START_TAG)
            .ok_or_else(|| SeqCrfError::InvalidVocabulary(format!("missing {START_TAG} tag")))?;
        let stop = *index
            .get(STOP_TAG)
            .ok_or_else(|| SeqCrfError::InvalidVocabulary(format!("missing {STOP_TAG} tag")))?;
        if names.len() < 3 {
            return Err(SeqCrfError::InvalidVocabulary(
                "at least one real tag besides START and STOP is required".into(),
            ));
        }

        Ok(Self {
            names,
            index,
            start,
            stop,
        })
    }

    /// Total number of tags, sentinels included.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false for a validated vocabulary.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Index of a tag by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Name of a tag by index.
    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Index of the `START` sentinel.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Index of the `STOP` sentinel.
    pub fn stop(&self) -> usize {
        self.stop
    }

    pub fn is_sentinel(&self, index: usize) -> bool {
        index == self.start || index == self.stop
    }

    /// Indices of all non-sentinel tags, ascending.
    pub fn real_tags(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).filter(|&idx| !self.is_sentinel(idx))
    }

    /// Map a decoded path back to tag names.
    pub fn decode_names(&self, path: &[usize]) -> Result<Vec<&str>> {
        path.iter()
            .map(|&tag| {
                self.name_of(tag).ok_or(SeqCrfError::TagOutOfRange {
                    tag,
                    num_tags: self.len(),
                })
            })
            .collect()
    }

    /// Check that a ground-truth label sequence only uses real tags.
    pub fn validate_labels(&self, labels: &[usize]) -> Result<()> {
        for &tag in labels {
            if tag >= self.len() {
                return Err(SeqCrfError::TagOutOfRange {
                    tag,
                    num_tags: self.len(),
                });
            }
            if self.is_sentinel(tag) {
                return Err(SeqCrfError::SentinelLabel { tag });
            }
        }
        Ok(())
    }
}

impl Default for TagVocabulary {
    fn default() -> Self {
        Self {
            names: ["O", "B-COM", "I-COM", "E-COM", START_TAG, STOP_TAG]
                .into_iter()
                .map(String::from)
                .collect(),
            index: [
                ("O", 0),
                ("B-COM", 1),
                ("I-COM", 2),
                ("E-COM", 3),
                (START_TAG, 4),
                (STOP_TAG, 5),
            ]
            .into_iter()
            .map(|(name, idx)| (name.to_string(), idx))
            .collect(),
            start: 4,
            stop: 5,
        }
    }
}

impl TryFrom<BTreeMap<String, usize>> for TagVocabulary {
    type Error = SeqCrfError;

    fn try_from(mapping: BTreeMap<String, usize>) -> Result<Self> {
        Self::new(mapping)
    }
}

impl From<TagVocabulary> for BTreeMap<String, usize> {
    fn from(vocab: TagVocabulary) -> Self {
        vocab.index.into_iter().collect()
    }
}
