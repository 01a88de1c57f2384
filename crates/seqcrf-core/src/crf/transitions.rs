//! Square matrix of pairwise tag-transition scores.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SeqCrfError};

/// Transition scores, row-major: `get(i, j)` is the score of moving from
/// tag `i` to tag `j`.
///
/// Deserialization goes through [`TransitionMatrix::from_flat`], so a loaded
/// matrix is square, non-empty and finite like a constructed one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTransitionMatrix")]
pub struct TransitionMatrix {
    num_tags: usize,
    scores: Vec<f32>,
}

#[derive(Deserialize)]
struct RawTransitionMatrix {
    num_tags: usize,
    scores: Vec<f32>,
}

impl TryFrom<RawTransitionMatrix> for TransitionMatrix {
    type Error = SeqCrfError;

    fn try_from(raw: RawTransitionMatrix) -> Result<Self> {
        Self::from_flat(raw.num_tags, raw.scores)
    }
}

impl TransitionMatrix {
    /// All-zero transitions.
    pub fn zeros(num_tags: usize) -> Self {
        Self {
            num_tags,
            scores: vec![0.0; num_tags * num_tags],
        }
    }

    /// Build from a flat row-major buffer of `num_tags * num_tags` scores.
    pub fn from_flat(num_tags: usize, scores: Vec<f32>) -> Result<Self> {
        if num_tags == 0 {
            return Err(SeqCrfError::DimensionMismatch {
                what: "transition matrix",
                expected: 1,
                got: 0,
            });
        }
        if scores.len() != num_tags * num_tags {
            return Err(SeqCrfError::DimensionMismatch {
                what: "transition matrix",
                expected: num_tags * num_tags,
                got: scores.len(),
            });
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(SeqCrfError::NonFinite {
                what: "transition matrix",
            });
        }
        Ok(Self { num_tags, scores })
    }

    /// Build from `num_tags` rows of `num_tags` scores each.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let num_tags = rows.len();
        for row in rows {
            if row.len() != num_tags {
                return Err(SeqCrfError::DimensionMismatch {
                    what: "transition matrix row",
                    expected: num_tags,
                    got: row.len(),
                });
            }
        }
        Self::from_flat(num_tags, rows.concat())
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    /// Score of the transition `from -> to`.
    ///
    /// # Panics
    /// If either index is `>= num_tags`.
    #[inline]
    pub fn get(&self, from: usize, to: usize) -> f32 {
        self.scores[from * self.num_tags + to]
    }

    /// Overwrite a single transition score.
    pub fn set(&mut self, from: usize, to: usize, score: f32) -> Result<()> {
        if !score.is_finite() {
            return Err(SeqCrfError::NonFinite {
                what: "transition matrix",
            });
        }
        for tag in [from, to] {
            if tag >= self.num_tags {
                return Err(SeqCrfError::TagOutOfRange {
                    tag,
                    num_tags: self.num_tags,
                });
            }
        }
        self.scores[from * self.num_tags + to] = score;
        Ok(())
    }

    /// Row-major view of all scores.
    pub fn as_slice(&self) -> &[f32] {
        &self.scores
    }
}
