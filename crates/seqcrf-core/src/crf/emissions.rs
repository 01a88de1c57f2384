//! Per-timestep emission scores for a single sequence.

use crate::error::{Result, SeqCrfError};

/// Emission matrix of shape `[seq_len, num_tags]`, stored row-major.
///
/// Construction guarantees at least one timestep and finite scores, so the
/// dynamic programs never see an empty or poisoned table.
#[derive(Debug, Clone, PartialEq)]
pub struct Emissions {
    num_tags: usize,
    scores: Vec<f32>,
}

impl Emissions {
    /// Build from a flat row-major buffer.
    pub fn from_flat(num_tags: usize, scores: Vec<f32>) -> Result<Self> {
        if scores.is_empty() {
            return Err(SeqCrfError::EmptySequence);
        }
        if num_tags == 0 || scores.len() % num_tags != 0 {
            return Err(SeqCrfError::DimensionMismatch {
                what: "emission row",
                expected: num_tags,
                got: scores.len(),
            });
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(SeqCrfError::NonFinite {
                what: "emission matrix",
            });
        }
        Ok(Self { num_tags, scores })
    }

    /// Build from one row per timestep.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let first = rows.first().ok_or(SeqCrfError::EmptySequence)?;
        let num_tags = first.len();
        for row in rows {
            if row.len() != num_tags {
                return Err(SeqCrfError::DimensionMismatch {
                    what: "emission row",
                    expected: num_tags,
                    got: row.len(),
                });
            }
        }
        Self::from_flat(num_tags, rows.concat())
    }

    /// Number of timesteps (always at least one).
    pub fn seq_len(&self) -> usize {
        self.scores.len() / self.num_tags
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    /// Scores of every tag at timestep `t`.
    #[inline]
    pub fn row(&self, t: usize) -> &[f32] {
        &self.scores[t * self.num_tags..(t + 1) * self.num_tags]
    }

    #[inline]
    pub fn get(&self, t: usize, tag: usize) -> f32 {
        self.scores[t * self.num_tags + tag]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.scores.chunks_exact(self.num_tags)
    }
}
