use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use tracing::debug;

use crate::config::ModelConfig;
use crate::crf::{CrfLayer, Decoded, Emissions, TransitionMatrix, ViterbiDecoder};
use crate::encoder::{BiGruEncoder, EncoderContext, InitialState};
use crate::error::{Result, SeqCrfError};
use crate::tags::TagVocabulary;

/// A BiGRU-CRF sequence labeling model (embedding + BiGRU + Linear + Transitions).
pub struct BiGruCrf {
    config: ModelConfig,
    encoder: BiGruEncoder,
    crf: CrfLayer,
    device: Device,
}

impl BiGruCrf {
    /// Create the model, registering encoder weights under `encoder` and the
    /// transition matrix under `crf` in the given var builder.
    pub fn new(config: ModelConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let device = vb.device().clone();
        let encoder = BiGruEncoder::new(&config, vb.pp("encoder"))?;
        let crf = CrfLayer::new(config.num_tags(), vb.pp("crf"))?;
        Ok(Self {
            config,
            encoder,
            crf,
            device,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn tags(&self) -> &TagVocabulary {
        &self.config.tag_map
    }

    pub fn crf(&self) -> &CrfLayer {
        &self.crf
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Fresh encoder context for a batch of `batch_size` sequences.
    pub fn context(&self, initial: InitialState, batch_size: usize) -> Result<EncoderContext> {
        EncoderContext::new(initial, batch_size, self.config.hidden_dim, &self.device)
    }

    /// Pack equal-length token sequences into a `[batch, seq_len]` tensor.
    pub fn token_tensor(&self, tokens: &[Vec<u32>]) -> Result<Tensor> {
        let first = tokens.first().ok_or(SeqCrfError::EmptyBatch)?;
        let seq_len = first.len();
        if seq_len == 0 {
            return Err(SeqCrfError::EmptySequence);
        }
        if let Some(row) = tokens.iter().find(|row| row.len() != seq_len) {
            return Err(SeqCrfError::DimensionMismatch {
                what: "token sequence",
                expected: seq_len,
                got: row.len(),
            });
        }
        Ok(Tensor::from_vec(
            tokens.concat(),
            (tokens.len(), seq_len),
            &self.device,
        )?)
    }

    /// Emission scores of shape `[batch, seq_len, num_tags]`.
    pub fn emissions(&self, tokens: &Tensor, ctx: &EncoderContext) -> Result<Tensor> {
        self.encoder.forward(tokens, ctx)
    }

    /// Training objective: `Σ_b (total_score_b - real_path_score_b)`, reduced
    /// per the configured [`Reduction`](crate::crf::Reduction).
    pub fn neg_log_likelihood(
        &self,
        tokens: &Tensor,
        labels: &[Vec<usize>],
        ctx: &EncoderContext,
    ) -> Result<Tensor> {
        let (batch_size, seq_len) = tokens.dims2()?;
        if labels.len() != batch_size {
            return Err(SeqCrfError::DimensionMismatch {
                what: "label batch",
                expected: batch_size,
                got: labels.len(),
            });
        }
        for label in labels {
            if label.len() != seq_len {
                return Err(SeqCrfError::LengthMismatch {
                    emissions: seq_len,
                    labels: label.len(),
                });
            }
            self.config.tag_map.validate_labels(label)?;
        }

        let logits = self.emissions(tokens, ctx)?;
        let per_sequence = (0..batch_size)
            .map(|b| logits.get(b))
            .collect::<candle_core::Result<Vec<_>>>()?;
        self.crf
            .neg_log_likelihood(&per_sequence, labels, self.config.reduction)
    }

    /// Inference: the best `(score, path)` for every sequence in the batch.
    pub fn decode(&self, tokens: &Tensor, ctx: &EncoderContext) -> Result<Vec<Decoded>> {
        let logits = self.emissions(tokens, ctx)?;
        let (batch_size, seq_len, num_tags) = logits.dims3()?;

        let transitions = self.crf.transition_matrix()?;
        let decoder = ViterbiDecoder::new(num_tags);
        let flat = logits.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;

        let decoded = flat
            .chunks_exact(seq_len * num_tags)
            .map(|chunk| {
                let emissions = Emissions::from_flat(num_tags, chunk.to_vec())?;
                decoder.decode(&emissions, &transitions)
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(batch_size, seq_len, "decoded batch");
        Ok(decoded)
    }

    /// Snapshot of the learned transition scores.
    pub fn transition_matrix(&self) -> Result<TransitionMatrix> {
        self.crf.transition_matrix()
    }
}
