//! # Bidirectional GRU Emission Encoder
//!
//! Maps token indices to per-timestep tag scores:
//! embedding -> forward and backward GRU -> concat -> linear -> (softmax).
//!
//! The encoder keeps no hidden state of its own. Initial hidden states are
//! carried by an [`EncoderContext`] created for each call, so concurrent
//! callers never share recurrent state.

use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::rnn::{gru, GRUConfig, GRUState, GRU, RNN};
use candle_nn::{Embedding, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::error::{Result, SeqCrfError};

/// How the initial hidden state of each direction is filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialState {
    /// All zeros; encoder output is a pure function of the tokens.
    Zeros,
    /// Standard normal noise, drawn fresh per context.
    #[default]
    Random,
}

/// Per-call recurrent state for both GRU directions, `[batch, hidden_dim]`.
#[derive(Debug, Clone)]
pub struct EncoderContext {
    batch_size: usize,
    hidden_dim: usize,
    forward: Tensor,
    backward: Tensor,
}

impl EncoderContext {
    pub fn new(
        initial: InitialState,
        batch_size: usize,
        hidden_dim: usize,
        device: &Device,
    ) -> Result<Self> {
        match initial {
            InitialState::Zeros => Self::zeros(batch_size, hidden_dim, device),
            InitialState::Random => Self::random(batch_size, hidden_dim, device),
        }
    }

    pub fn zeros(batch_size: usize, hidden_dim: usize, device: &Device) -> Result<Self> {
        let shape = (batch_size, hidden_dim);
        Ok(Self {
            batch_size,
            hidden_dim,
            forward: Tensor::zeros(shape, DType::F32, device)?,
            backward: Tensor::zeros(shape, DType::F32, device)?,
        })
    }

    pub fn random(batch_size: usize, hidden_dim: usize, device: &Device) -> Result<Self> {
        let shape = (batch_size, hidden_dim);
        Ok(Self {
            batch_size,
            hidden_dim,
            forward: Tensor::randn(0f32, 1f32, shape, device)?,
            backward: Tensor::randn(0f32, 1f32, shape, device)?,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }
}

/// Embedding + BiGRU + linear projection to tag scores.
pub struct BiGruEncoder {
    embedding: Embedding,
    gru_forward: GRU,
    gru_backward: GRU,
    hidden2tag: Linear,
    vocab_size: usize,
    hidden_dim: usize,
    num_tags: usize,
    softmax: bool,
}

impl BiGruEncoder {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let num_tags = config.num_tags();
        let embedding = candle_nn::embedding(
            config.vocab_size,
            config.embedding_dim,
            vb.pp("word_embeddings"),
        )?;
        let gru_forward = gru(
            config.embedding_dim,
            config.hidden_dim,
            GRUConfig::default(),
            vb.pp("gru_forward"),
        )?;
        let gru_backward = gru(
            config.embedding_dim,
            config.hidden_dim,
            GRUConfig::default(),
            vb.pp("gru_backward"),
        )?;
        let hidden2tag = candle_nn::linear(config.hidden_dim * 2, num_tags, vb.pp("hidden2tag"))?;

        Ok(Self {
            embedding,
            gru_forward,
            gru_backward,
            hidden2tag,
            vocab_size: config.vocab_size,
            hidden_dim: config.hidden_dim,
            num_tags,
            softmax: config.softmax_emissions,
        })
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// Encode `tokens` (`[batch, seq_len]`, `u32`) into emission scores of
    /// shape `[batch, seq_len, num_tags]`.
    pub fn forward(&self, tokens: &Tensor, ctx: &EncoderContext) -> Result<Tensor> {
        let (batch_size, seq_len) = tokens.dims2()?;
        if seq_len == 0 {
            return Err(SeqCrfError::EmptySequence);
        }
        if batch_size == 0 {
            return Err(SeqCrfError::EmptyBatch);
        }
        if ctx.batch_size != batch_size {
            return Err(SeqCrfError::DimensionMismatch {
                what: "encoder context batch",
                expected: batch_size,
                got: ctx.batch_size,
            });
        }
        if ctx.hidden_dim != self.hidden_dim {
            return Err(SeqCrfError::DimensionMismatch {
                what: "encoder context hidden",
                expected: self.hidden_dim,
                got: ctx.hidden_dim,
            });
        }
        let ids = tokens.flatten_all()?.to_vec1::<u32>()?;
        if let Some(&token) = ids.iter().find(|&&t| t as usize >= self.vocab_size) {
            return Err(SeqCrfError::TokenOutOfRange {
                token,
                vocab_size: self.vocab_size,
            });
        }

        let embeddings = self.embedding.forward(tokens)?;

        let forward_states = self.gru_forward.seq_init(
            &embeddings,
            &GRUState {
                h: ctx.forward.clone(),
            },
        )?;
        let forward_out = stack_states(&forward_states)?;

        let reverse = reverse_index(seq_len, tokens.device())?;
        let reversed = embeddings.index_select(&reverse, 1)?;
        let backward_states = self.gru_backward.seq_init(
            &reversed,
            &GRUState {
                h: ctx.backward.clone(),
            },
        )?;
        let backward_out = stack_states(&backward_states)?.index_select(&reverse, 1)?;

        let hidden = Tensor::cat(&[&forward_out, &backward_out], 2)?;
        let logits = self.hidden2tag.forward(&hidden)?;
        if self.softmax {
            Ok(candle_nn::ops::softmax(&logits, D::Minus1)?)
        } else {
            Ok(logits)
        }
    }
}

/// Per-timestep hidden states as `[batch, seq_len, hidden_dim]`.
///
/// `RNN::states_to_tensor` concatenates along dim 1, which flattens time
/// into the hidden axis; a new time axis is stacked instead.
fn stack_states(states: &[GRUState]) -> Result<Tensor> {
    let hidden: Vec<Tensor> = states.iter().map(|s| s.h.clone()).collect();
    Ok(Tensor::stack(&hidden, 1)?)
}

/// `[seq_len - 1, ..., 1, 0]` for flipping the time axis.
fn reverse_index(seq_len: usize, device: &Device) -> Result<Tensor> {
    let idx: Vec<u32> = (0..seq_len as u32).rev().collect();
    Ok(Tensor::from_vec(idx, seq_len, device)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn small_config() -> ModelConfig {
        ModelConfig::new()
            .with_vocab_size(10)
            .with_embedding_dim(6)
            .with_hidden_dim(5)
    }

    fn tokens(device: &Device) -> Tensor {
        Tensor::from_vec(vec![1u32, 2, 3, 4, 5, 6, 7, 8], (2, 4), device).unwrap()
    }

    #[test]
    fn output_shape_and_softmax_rows() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = BiGruEncoder::new(&small_config(), vb).unwrap();

        let ctx = EncoderContext::random(2, 5, &device).unwrap();
        let logits = encoder.forward(&tokens(&device), &ctx).unwrap();
        assert_eq!(logits.dims(), &[2, 4, 6]);

        let sums = logits.sum(D::Minus1).unwrap().flatten_all().unwrap();
        for s in sums.to_vec1::<f32>().unwrap() {
            assert!((s - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn hidden_states_keep_a_time_axis() {
        let device = Device::Cpu;
        let states: Vec<GRUState> = (0..3)
            .map(|t| GRUState {
                h: Tensor::ones((2, 5), DType::F32, &device)
                    .unwrap()
                    .affine(t as f64, 0.0)
                    .unwrap(),
            })
            .collect();

        let stacked = stack_states(&states).unwrap();
        assert_eq!(stacked.dims(), &[2, 3, 5]);
        let values = stacked.to_vec3::<f32>().unwrap();
        for row in &values {
            for (t, step) in row.iter().enumerate() {
                assert!(step.iter().all(|&v| v == t as f32));
            }
        }
    }

    #[test]
    fn single_token_sequence_encodes() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = BiGruEncoder::new(&small_config(), vb).unwrap();
        let ctx = EncoderContext::zeros(1, 5, &device).unwrap();

        let one = Tensor::from_vec(vec![4u32], (1, 1), &device).unwrap();
        let logits = encoder.forward(&one, &ctx).unwrap();
        assert_eq!(logits.dims(), &[1, 1, 6]);
    }

    #[test]
    fn zero_context_is_deterministic() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = BiGruEncoder::new(&small_config().with_softmax(false), vb).unwrap();

        let ctx = EncoderContext::zeros(2, 5, &device).unwrap();
        let a = encoder.forward(&tokens(&device), &ctx).unwrap();
        let b = encoder.forward(&tokens(&device), &ctx).unwrap();
        assert_eq!(a.to_vec3::<f32>().unwrap(), b.to_vec3::<f32>().unwrap());
    }

    #[test]
    fn backward_direction_sees_future_tokens() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = BiGruEncoder::new(&small_config().with_softmax(false), vb).unwrap();
        let ctx = EncoderContext::zeros(1, 5, &device).unwrap();

        let a = Tensor::from_vec(vec![1u32, 2, 3], (1, 3), &device).unwrap();
        let b = Tensor::from_vec(vec![1u32, 2, 9], (1, 3), &device).unwrap();
        let first_a = encoder.forward(&a, &ctx).unwrap().to_vec3::<f32>().unwrap()[0][0].clone();
        let first_b = encoder.forward(&b, &ctx).unwrap().to_vec3::<f32>().unwrap()[0][0].clone();
        // Only the last token differs, yet the first timestep changes.
        assert_ne!(first_a, first_b);
    }

    #[test]
    fn rejects_bad_inputs() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let encoder = BiGruEncoder::new(&small_config(), vb).unwrap();

        let ctx = EncoderContext::zeros(3, 5, &device).unwrap();
        assert!(matches!(
            encoder.forward(&tokens(&device), &ctx),
            Err(SeqCrfError::DimensionMismatch { expected: 2, got: 3, .. })
        ));

        let ctx = EncoderContext::zeros(1, 5, &device).unwrap();
        let out_of_range = Tensor::from_vec(vec![3u32, 10], (1, 2), &device).unwrap();
        assert!(matches!(
            encoder.forward(&out_of_range, &ctx),
            Err(SeqCrfError::TokenOutOfRange { token: 10, vocab_size: 10 })
        ));

        let empty = Tensor::zeros((1, 0), DType::U32, &device).unwrap();
        assert!(matches!(
            encoder.forward(&empty, &ctx),
            Err(SeqCrfError::EmptySequence)
        ));
    }
}
