//! Batch negative log-likelihood.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::crf::emissions::Emissions;
use crate::crf::scoring::{real_path_score, total_score};
use crate::crf::transitions::TransitionMatrix;
use crate::error::{Result, SeqCrfError};

/// How per-sequence losses are folded into one scalar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Sum over the batch.
    #[default]
    Sum,
    /// Sum divided by the number of sequences.
    Mean,
}

impl Reduction {
    pub(crate) fn apply(self, total: f32, batch_size: usize) -> f32 {
        match self {
            Reduction::Sum => total,
            Reduction::Mean => total / batch_size as f32,
        }
    }
}

/// `Σ (total_score - real_path_score)` over a batch of
/// `(emissions, labels)` pairs, reduced as requested.
///
/// Sequences may differ in length from one another.
pub fn neg_log_likelihood(
    batch: &[(Emissions, Vec<usize>)],
    transitions: &TransitionMatrix,
    reduction: Reduction,
) -> Result<f32> {
    if batch.is_empty() {
        return Err(SeqCrfError::EmptyBatch);
    }

    let mut real = 0.0f32;
    let mut total = 0.0f32;
    for (idx, (emissions, labels)) in batch.iter().enumerate() {
        let path = real_path_score(emissions, transitions, labels)?;
        let norm = total_score(emissions, transitions)?;
        trace!(sequence = idx, real_path_score = path, total_score = norm);
        real += path;
        total += norm;
    }

    debug!(real_path_score = real, total_score = total, "batch scores");
    Ok(reduction.apply(total - real, batch.len()))
}
