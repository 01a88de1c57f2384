//! # CRF Output Layer
//!
//! Differentiable path score and partition function on candle tensors. The
//! transition matrix is a trainable variable; gradients flow through both
//! it and the emission logits produced by the encoder.
//!
//! Decoding does not need gradients, so it snapshots the tensors into the
//! scalar [`Emissions`] / [`TransitionMatrix`] types and runs the scalar
//! Viterbi decoder.

use candle_core::{DType, Device, Tensor};
use candle_nn::{Init, VarBuilder};
use tracing::{debug, trace};

use crate::crf::emissions::Emissions;
use crate::crf::loss::Reduction;
use crate::crf::transitions::TransitionMatrix;
use crate::crf::viterbi::{Decoded, ViterbiDecoder};
use crate::error::{Result, SeqCrfError};

/// `ln Σ exp(xs)` along `dim` using max subtraction. The reduced dimension
/// is removed from the output.
pub fn log_sum_exp(xs: &Tensor, dim: usize) -> candle_core::Result<Tensor> {
    let max = xs.max_keepdim(dim)?;
    let shifted = xs.broadcast_sub(&max)?.exp()?.sum_keepdim(dim)?.log()?;
    (shifted + max)?.squeeze(dim)
}

/// Reject tensors holding NaN or infinity.
pub(crate) fn ensure_finite(tensor: &Tensor, what: &'static str) -> Result<()> {
    let values = tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
    if values.iter().any(|v| !v.is_finite()) {
        return Err(SeqCrfError::NonFinite { what });
    }
    Ok(())
}

fn label_tensor(labels: &[usize], device: &Device) -> Result<Tensor> {
    let idx: Vec<u32> = labels.iter().map(|&tag| tag as u32).collect();
    let len = idx.len();
    Ok(Tensor::from_vec(idx, len, device)?)
}

/// Linear-chain CRF with a learned `[num_tags, num_tags]` transition matrix.
pub struct CrfLayer {
    num_tags: usize,
    transitions: Tensor,
}

impl CrfLayer {
    /// Create the layer with standard-normal transitions stored under
    /// `transitions` in the given var builder.
    pub fn new(num_tags: usize, vb: VarBuilder) -> Result<Self> {
        let transitions = vb.get_with_hints(
            (num_tags, num_tags),
            "transitions",
            Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        )?;
        Ok(Self {
            num_tags,
            transitions,
        })
    }

    /// Wrap an existing square transition tensor.
    pub fn from_transitions(transitions: Tensor) -> Result<Self> {
        let (rows, cols) = transitions.dims2()?;
        if rows != cols {
            return Err(SeqCrfError::DimensionMismatch {
                what: "transition matrix",
                expected: rows,
                got: cols,
            });
        }
        ensure_finite(&transitions, "transition matrix")?;
        Ok(Self {
            num_tags: rows,
            transitions,
        })
    }

    /// Build a constant layer from a scalar transition matrix.
    pub fn from_matrix(matrix: &TransitionMatrix, device: &Device) -> Result<Self> {
        let n = matrix.num_tags();
        let transitions = Tensor::from_slice(matrix.as_slice(), (n, n), device)?;
        Self::from_transitions(transitions)
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    pub fn transitions(&self) -> &Tensor {
        &self.transitions
    }

    /// Copy of the current transition scores.
    pub fn transition_matrix(&self) -> Result<TransitionMatrix> {
        let flat = self
            .transitions
            .to_dtype(DType::F32)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        TransitionMatrix::from_flat(self.num_tags, flat)
    }

    /// Validate a `[seq_len, num_tags]` logits tensor and return its length.
    fn check_logits(&self, logits: &Tensor) -> Result<usize> {
        let (seq_len, num_tags) = logits.dims2()?;
        if seq_len == 0 {
            return Err(SeqCrfError::EmptySequence);
        }
        if num_tags != self.num_tags {
            return Err(SeqCrfError::DimensionMismatch {
                what: "emission tag",
                expected: self.num_tags,
                got: num_tags,
            });
        }
        ensure_finite(logits, "emission matrix")?;
        Ok(seq_len)
    }

    fn check_labels(&self, seq_len: usize, labels: &[usize]) -> Result<()> {
        if labels.is_empty() {
            return Err(SeqCrfError::EmptySequence);
        }
        if labels.len() != seq_len {
            return Err(SeqCrfError::LengthMismatch {
                emissions: seq_len,
                labels: labels.len(),
            });
        }
        if let Some(&tag) = labels.iter().find(|&&tag| tag >= self.num_tags) {
            return Err(SeqCrfError::TagOutOfRange {
                tag,
                num_tags: self.num_tags,
            });
        }
        Ok(())
    }

    /// Score of one labeled path as a rank-0 tensor.
    pub fn real_path_score(&self, logits: &Tensor, labels: &[usize]) -> Result<Tensor> {
        ensure_finite(&self.transitions, "transition matrix")?;
        let seq_len = self.check_logits(logits)?;
        self.check_labels(seq_len, labels)?;
        self.path_score_unchecked(logits, labels)
    }

    /// Log partition function as a rank-0 tensor.
    pub fn total_score(&self, logits: &Tensor) -> Result<Tensor> {
        ensure_finite(&self.transitions, "transition matrix")?;
        let seq_len = self.check_logits(logits)?;
        self.total_score_unchecked(logits, seq_len)
    }

    fn path_score_unchecked(&self, logits: &Tensor, labels: &[usize]) -> Result<Tensor> {
        let device = logits.device();
        let logits = logits.contiguous()?;

        let tags = label_tensor(labels, device)?;
        let emission = logits.gather(&tags.unsqueeze(1)?, 1)?.sum_all()?;
        if labels.len() == 1 {
            return Ok(emission);
        }

        let from = label_tensor(&labels[..labels.len() - 1], device)?;
        let to = label_tensor(&labels[1..], device)?;
        let transition = self
            .transitions
            .index_select(&from, 0)?
            .gather(&to.unsqueeze(1)?, 1)?
            .sum_all()?;

        Ok((emission + transition)?)
    }

    fn total_score_unchecked(&self, logits: &Tensor, seq_len: usize) -> Result<Tensor> {
        let mut alpha = logits.get(0)?;
        for t in 1..seq_len {
            // scores[prev][curr] = alpha[prev] + transitions[prev][curr]
            let scores = alpha.unsqueeze(1)?.broadcast_add(&self.transitions)?;
            alpha = (log_sum_exp(&scores, 0)? + logits.get(t)?)?;
        }
        Ok(log_sum_exp(&alpha, 0)?)
    }

    /// Batch negative log-likelihood. `logits[b]` is `[seq_len_b, num_tags]`
    /// and `labels[b]` has `seq_len_b` entries.
    pub fn neg_log_likelihood(
        &self,
        logits: &[Tensor],
        labels: &[Vec<usize>],
        reduction: Reduction,
    ) -> Result<Tensor> {
        if logits.is_empty() {
            return Err(SeqCrfError::EmptyBatch);
        }
        if logits.len() != labels.len() {
            return Err(SeqCrfError::DimensionMismatch {
                what: "batch",
                expected: logits.len(),
                got: labels.len(),
            });
        }
        ensure_finite(&self.transitions, "transition matrix")?;

        let mut real_scores = Vec::with_capacity(logits.len());
        let mut total_scores = Vec::with_capacity(logits.len());
        for (idx, (logit, label)) in logits.iter().zip(labels).enumerate() {
            let seq_len = self.check_logits(logit)?;
            self.check_labels(seq_len, label)?;
            let real = self.path_score_unchecked(logit, label)?;
            let total = self.total_score_unchecked(logit, seq_len)?;
            if tracing::enabled!(tracing::Level::TRACE) {
                let real_path_score = real.to_scalar::<f32>()?;
                let total_score = total.to_scalar::<f32>()?;
                trace!(sequence = idx, real_path_score, total_score);
            }
            real_scores.push(real);
            total_scores.push(total);
        }

        let real = Tensor::stack(&real_scores, 0)?;
        let total = Tensor::stack(&total_scores, 0)?;
        let per_sequence = (&total - &real)?;
        let loss = match reduction {
            Reduction::Sum => per_sequence.sum_all()?,
            Reduction::Mean => per_sequence.mean_all()?,
        };

        if tracing::enabled!(tracing::Level::DEBUG) {
            let real_path_score = real.sum_all()?.to_scalar::<f32>()?;
            let total_score = total.sum_all()?.to_scalar::<f32>()?;
            let loss = loss.to_scalar::<f32>()?;
            debug!(real_path_score, total_score, loss, "batch scores");
        }
        Ok(loss)
    }

    /// Highest-scoring path for one `[seq_len, num_tags]` logits tensor.
    pub fn viterbi_decode(&self, logits: &Tensor) -> Result<Decoded> {
        let (seq_len, _) = logits.dims2()?;
        if seq_len == 0 {
            return Err(SeqCrfError::EmptySequence);
        }
        let flat = logits.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        let emissions = Emissions::from_flat(flat.len() / seq_len, flat)?;
        let transitions = self.transition_matrix()?;
        ViterbiDecoder::new(self.num_tags).decode(&emissions, &transitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crf::scoring::{real_path_score, total_score};

    fn fixture(device: &Device) -> (CrfLayer, Tensor, Emissions) {
        let rows = vec![
            vec![0.4, -0.3, 1.2],
            vec![0.9, 0.1, -0.5],
            vec![-0.2, 0.7, 0.3],
            vec![0.0, 0.5, 0.8],
        ];
        let trans = TransitionMatrix::from_rows(&[
            vec![0.3, -0.6, 0.1],
            vec![0.2, 0.4, -0.9],
            vec![-0.1, 0.5, 0.0],
        ])
        .unwrap();
        let layer = CrfLayer::from_matrix(&trans, device).unwrap();
        let emissions = Emissions::from_rows(&rows).unwrap();
        let logits = Tensor::from_vec(rows.concat(), (4, 3), device).unwrap();
        (layer, logits, emissions)
    }

    #[test]
    fn tensor_log_sum_exp_matches_scalar() {
        let device = Device::Cpu;
        let xs = Tensor::from_vec(vec![1000.0f32, 999.0, -5.0], 3, &device).unwrap();
        let got = log_sum_exp(&xs, 0).unwrap().to_scalar::<f32>().unwrap();
        let want = crate::crf::scoring::log_sum_exp(&[1000.0, 999.0, -5.0]);
        assert!(got.is_finite());
        assert!((got - want).abs() < 1e-3);
    }

    #[test]
    fn tensor_scores_match_scalar_core() {
        let device = Device::Cpu;
        let (layer, logits, emissions) = fixture(&device);
        let trans = layer.transition_matrix().unwrap();
        let labels = [2, 0, 1, 2];

        let path = layer.real_path_score(&logits, &labels).unwrap();
        let want = real_path_score(&emissions, &trans, &labels).unwrap();
        assert!((path.to_scalar::<f32>().unwrap() - want).abs() < 1e-4);

        let total = layer.total_score(&logits).unwrap();
        let want = total_score(&emissions, &trans).unwrap();
        assert!((total.to_scalar::<f32>().unwrap() - want).abs() < 1e-4);
    }

    #[test]
    fn single_timestep_tensor_scores() {
        let device = Device::Cpu;
        let (layer, logits, _) = fixture(&device);
        let first = logits.narrow(0, 0, 1).unwrap();

        let path = layer.real_path_score(&first, &[2]).unwrap();
        assert!((path.to_scalar::<f32>().unwrap() - 1.2).abs() < 1e-6);

        let total = layer.total_score(&first).unwrap().to_scalar::<f32>().unwrap();
        let want = crate::crf::scoring::log_sum_exp(&[0.4, -0.3, 1.2]);
        assert!((total - want).abs() < 1e-5);

        let decoded = layer.viterbi_decode(&first).unwrap();
        assert_eq!(decoded.path, vec![2]);
    }

    #[test]
    fn loss_is_non_negative_and_reduces() {
        let device = Device::Cpu;
        let (layer, logits, _) = fixture(&device);
        let short = logits.narrow(0, 1, 2).unwrap();
        let batch = vec![logits, short];
        let labels = vec![vec![0, 1, 2, 0], vec![1, 1]];

        let sum = layer
            .neg_log_likelihood(&batch, &labels, Reduction::Sum)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        let mean = layer
            .neg_log_likelihood(&batch, &labels, Reduction::Mean)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(sum >= 0.0);
        assert!((mean - sum / 2.0).abs() < 1e-5);
    }

    #[test]
    fn rejects_invalid_inputs() {
        let device = Device::Cpu;
        let (layer, logits, _) = fixture(&device);

        assert!(matches!(
            layer.real_path_score(&logits, &[0, 1]),
            Err(SeqCrfError::LengthMismatch { emissions: 4, labels: 2 })
        ));
        assert!(matches!(
            layer.real_path_score(&logits, &[0, 1, 3, 0]),
            Err(SeqCrfError::TagOutOfRange { tag: 3, .. })
        ));

        let empty = Tensor::zeros((0, 3), DType::F32, &device).unwrap();
        assert!(matches!(
            layer.total_score(&empty),
            Err(SeqCrfError::EmptySequence)
        ));

        let nan = Tensor::from_vec(vec![0.0f32, f32::NAN, 1.0], (1, 3), &device).unwrap();
        assert!(matches!(
            layer.total_score(&nan),
            Err(SeqCrfError::NonFinite { .. })
        ));

        let wide = Tensor::zeros((2, 4), DType::F32, &device).unwrap();
        assert!(matches!(
            layer.total_score(&wide),
            Err(SeqCrfError::DimensionMismatch { expected: 3, got: 4, .. })
        ));

        assert!(matches!(
            layer.neg_log_likelihood(&[], &[], Reduction::Sum),
            Err(SeqCrfError::EmptyBatch)
        ));
    }

    #[test]
    fn rejects_non_finite_transitions() {
        let device = Device::Cpu;
        let trans = Tensor::from_vec(vec![0.0f32, f32::INFINITY, 0.0, 0.0], (2, 2), &device)
            .unwrap();
        assert!(matches!(
            CrfLayer::from_transitions(trans),
            Err(SeqCrfError::NonFinite { .. })
        ));
        let rect = Tensor::zeros((2, 3), DType::F32, &device).unwrap();
        assert!(CrfLayer::from_transitions(rect).is_err());
    }

    #[test]
    fn gradients_reach_transitions() {
        let device = Device::Cpu;
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let layer = CrfLayer::new(3, vb.pp("crf")).unwrap();
        let (_, logits, _) = fixture(&device);

        let loss = layer
            .neg_log_likelihood(&[logits], &[vec![0, 1, 2, 0]], Reduction::Sum)
            .unwrap();
        let grads = loss.backward().unwrap();
        let grad = grads.get(layer.transitions()).expect("transition gradient");
        assert_eq!(grad.dims(), &[3, 3]);
        let values = grad.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
        assert!(values.iter().any(|v| v.abs() > 0.0));
    }
}
