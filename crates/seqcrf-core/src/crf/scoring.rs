//! # Path Scoring and the Forward Algorithm
//!
//! Scalar implementations of the two quantities a linear-chain CRF needs
//! for maximum-likelihood training: the score of one labeled path and the
//! log partition function over every path.

use crate::crf::emissions::Emissions;
use crate::crf::transitions::TransitionMatrix;
use crate::error::{Result, SeqCrfError};

/// `ln Σ exp(x)` computed as `max(x) + ln Σ exp(x - max(x))`.
///
/// Returns `-inf` for an empty slice.
pub fn log_sum_exp(xs: &[f32]) -> f32 {
    let max = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f32 = xs.iter().map(|&x| (x - max).exp()).sum();
    max + sum.ln()
}

pub(crate) fn check_tag_count(emissions: &Emissions, transitions: &TransitionMatrix) -> Result<()> {
    if emissions.num_tags() != transitions.num_tags() {
        return Err(SeqCrfError::DimensionMismatch {
            what: "emission tag",
            expected: transitions.num_tags(),
            got: emissions.num_tags(),
        });
    }
    Ok(())
}

/// Score of one labeled path: the emission of every chosen tag plus the
/// transition between each consecutive pair.
pub fn real_path_score(
    emissions: &Emissions,
    transitions: &TransitionMatrix,
    labels: &[usize],
) -> Result<f32> {
    check_tag_count(emissions, transitions)?;
    if labels.is_empty() {
        return Err(SeqCrfError::EmptySequence);
    }
    if labels.len() != emissions.seq_len() {
        return Err(SeqCrfError::LengthMismatch {
            emissions: emissions.seq_len(),
            labels: labels.len(),
        });
    }
    if let Some(&tag) = labels.iter().find(|&&tag| tag >= emissions.num_tags()) {
        return Err(SeqCrfError::TagOutOfRange {
            tag,
            num_tags: emissions.num_tags(),
        });
    }

    let emission: f32 = labels
        .iter()
        .enumerate()
        .map(|(t, &tag)| emissions.get(t, tag))
        .sum();
    // A single-tag path has no pairs, so `windows(2)` yields nothing.
    let transition: f32 = labels
        .windows(2)
        .map(|pair| transitions.get(pair[0], pair[1]))
        .sum();

    Ok(emission + transition)
}

/// Log partition function `ln Σ_paths exp(score(path))`.
///
/// Runs the forward recurrence in `O(seq_len * num_tags^2)`.
pub fn total_score(emissions: &Emissions, transitions: &TransitionMatrix) -> Result<f32> {
    check_tag_count(emissions, transitions)?;
    let num_tags = emissions.num_tags();

    let mut alpha = emissions.row(0).to_vec();
    let mut next = vec![0.0f32; num_tags];
    let mut scores = vec![0.0f32; num_tags];

    for t in 1..emissions.seq_len() {
        let row = emissions.row(t);
        for (curr, slot) in next.iter_mut().enumerate() {
            for (prev, score) in scores.iter_mut().enumerate() {
                *score = alpha[prev] + transitions.get(prev, curr);
            }
            *slot = log_sum_exp(&scores) + row[curr];
        }
        std::mem::swap(&mut alpha, &mut next);
    }

    Ok(log_sum_exp(&alpha))
}
