//! # Viterbi Decoding for CRF
//!
//! Implements the max-sum Viterbi algorithm for finding the highest-scoring
//! tag sequence given emission scores and a transition matrix.
//!
//! Ties are broken toward the lowest tag index, both when choosing a
//! predecessor and when choosing the final tag. Repeated calls on the same
//! inputs therefore always return the same path.

use serde::{Deserialize, Serialize};

use crate::crf::emissions::Emissions;
use crate::crf::scoring::check_tag_count;
use crate::crf::transitions::TransitionMatrix;
use crate::error::{Result, SeqCrfError};

/// Best path through the trellis together with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decoded {
    /// Score of `path`, identical to the path score of that labeling.
    pub score: f32,
    /// One tag index per timestep.
    pub path: Vec<usize>,
}

/// Best score reaching a trellis cell and the predecessor it came from.
#[derive(Debug, Clone, Copy)]
struct PathState {
    score: f32,
    prev_tag: usize,
}

/// Viterbi decoder for CRF tag sequences.
#[derive(Debug, Clone)]
pub struct ViterbiDecoder {
    num_tags: usize,
}

impl ViterbiDecoder {
    /// Create a new Viterbi decoder.
    ///
    /// # Arguments
    /// * `num_tags` - Number of distinct tags, sentinels included
    pub fn new(num_tags: usize) -> Self {
        Self { num_tags }
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    /// Decode the optimal tag sequence.
    ///
    /// # Arguments
    /// * `emissions` - Emission scores of shape `[seq_len, num_tags]`
    /// * `transitions` - Transition scores of shape `[num_tags, num_tags]`
    ///
    /// # Returns
    /// The best path and its score.
    pub fn decode(&self, emissions: &Emissions, transitions: &TransitionMatrix) -> Result<Decoded> {
        if transitions.num_tags() != self.num_tags {
            return Err(SeqCrfError::DimensionMismatch {
                what: "transition matrix",
                expected: self.num_tags,
                got: transitions.num_tags(),
            });
        }
        check_tag_count(emissions, transitions)?;

        let seq_len = emissions.seq_len();
        let num_tags = self.num_tags;

        // Trellis: [seq_len][num_tags]. Row 0 has no predecessor.
        let mut dp: Vec<Vec<PathState>> = Vec::with_capacity(seq_len);
        dp.push(
            emissions
                .row(0)
                .iter()
                .map(|&score| PathState { score, prev_tag: 0 })
                .collect(),
        );

        for pos in 1..seq_len {
            let prev_row = &dp[pos - 1];
            let row: Vec<PathState> = (0..num_tags)
                .map(|curr_tag| {
                    let mut best = PathState {
                        score: prev_row[0].score + transitions.get(0, curr_tag),
                        prev_tag: 0,
                    };
                    for (prev_tag, prev) in prev_row.iter().enumerate().skip(1) {
                        let score = prev.score + transitions.get(prev_tag, curr_tag);
                        // Strict comparison keeps the lowest index on ties.
                        if score > best.score {
                            best = PathState { score, prev_tag };
                        }
                    }
                    PathState {
                        score: best.score + emissions.get(pos, curr_tag),
                        prev_tag: best.prev_tag,
                    }
                })
                .collect();
            dp.push(row);
        }

        let (best_final_tag, best_final_score) = argmax(dp[seq_len - 1].iter().map(|s| s.score));

        // Backtrack
        let mut path = Vec::with_capacity(seq_len);
        path.push(best_final_tag);
        let mut curr_tag = best_final_tag;
        for pos in (1..seq_len).rev() {
            curr_tag = dp[pos][curr_tag].prev_tag;
            path.push(curr_tag);
        }
        path.reverse();

        Ok(Decoded {
            score: best_final_score,
            path,
        })
    }
}

/// Highest-scoring tag and its score; the first index wins ties.
fn argmax(scores: impl Iterator<Item = f32>) -> (usize, f32) {
    scores
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (idx, score)| {
            if score > best.1 { (idx, score) } else { best }
        })
}

/// Decode with a decoder sized to the transition matrix.
pub fn viterbi_decode(emissions: &Emissions, transitions: &TransitionMatrix) -> Result<Decoded> {
    ViterbiDecoder::new(transitions.num_tags()).decode(emissions, transitions)
}
