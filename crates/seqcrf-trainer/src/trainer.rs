//! Optimizer step and evaluation for the BiGRU-CRF model.

use candle_core::{DType, Device};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use seqcrf_core::{BiGruCrf, InitialState, ModelConfig};

/// A batch of equal-length token sequences with their gold labels.
#[derive(Debug, Clone)]
pub struct Batch {
    pub tokens: Vec<Vec<u32>>,
    pub labels: Vec<Vec<usize>>,
}

impl Batch {
    pub fn new(tokens: Vec<Vec<u32>>, labels: Vec<Vec<usize>>) -> anyhow::Result<Self> {
        if tokens.is_empty() {
            anyhow::bail!("batch is empty");
        }
        if tokens.len() != labels.len() {
            anyhow::bail!(
                "batch has {} token sequences but {} label sequences",
                tokens.len(),
                labels.len()
            );
        }
        let seq_len = tokens[0].len();
        for (idx, (toks, tags)) in tokens.iter().zip(&labels).enumerate() {
            if toks.len() != seq_len {
                anyhow::bail!(
                    "sequence {idx} has {} tokens, expected {seq_len}",
                    toks.len()
                );
            }
            if tags.len() != toks.len() {
                anyhow::bail!(
                    "sequence {idx} has {} tokens but {} labels",
                    toks.len(),
                    tags.len()
                );
            }
        }
        Ok(Self { tokens, labels })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn default_learning_rate() -> f64 {
    0.01
}

/// Optimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default)]
    pub weight_decay: f64,
    /// Initial GRU state used for every training and evaluation call.
    #[serde(default)]
    pub initial_state: InitialState,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            weight_decay: 0.0,
            initial_state: InitialState::default(),
        }
    }
}

impl TrainerConfig {
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn with_initial_state(mut self, initial_state: InitialState) -> Self {
        self.initial_state = initial_state;
        self
    }
}

/// Owns the model parameters and the optimizer that updates them.
pub struct Trainer {
    model: BiGruCrf,
    varmap: VarMap,
    optimizer: AdamW,
    config: TrainerConfig,
    steps: usize,
}

impl Trainer {
    pub fn new(
        model_config: ModelConfig,
        config: TrainerConfig,
        device: &Device,
    ) -> anyhow::Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = BiGruCrf::new(model_config, vb)?;

        let optimizer = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: config.learning_rate,
                weight_decay: config.weight_decay,
                ..Default::default()
            },
        )?;
        info!(
            num_tags = model.tags().len(),
            parameters = varmap.all_vars().len(),
            learning_rate = config.learning_rate,
            "trainer ready"
        );

        Ok(Self {
            model,
            varmap,
            optimizer,
            config,
            steps: 0,
        })
    }

    pub fn model(&self) -> &BiGruCrf {
        &self.model
    }

    /// Parameter store; hand this to an external serializer to persist weights.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Loss on `batch` without updating any parameter.
    pub fn loss(&self, batch: &Batch) -> anyhow::Result<f32> {
        let tokens = self.model.token_tensor(&batch.tokens)?;
        let ctx = self.model.context(self.config.initial_state, batch.len())?;
        let loss = self.model.neg_log_likelihood(&tokens, &batch.labels, &ctx)?;
        Ok(loss.to_scalar::<f32>()?)
    }

    /// One backward pass and optimizer update. Returns the loss before the update.
    pub fn step(&mut self, batch: &Batch) -> anyhow::Result<f32> {
        let tokens = self.model.token_tensor(&batch.tokens)?;
        let ctx = self.model.context(self.config.initial_state, batch.len())?;
        let loss = self.model.neg_log_likelihood(&tokens, &batch.labels, &ctx)?;
        self.optimizer.backward_step(&loss)?;
        self.steps += 1;

        let value = loss.to_scalar::<f32>()?;
        info!(step = self.steps, loss = value, "training step");
        Ok(value)
    }

    /// Token-level accuracy of Viterbi decoding against the gold labels.
    pub fn evaluate(&self, batch: &Batch) -> anyhow::Result<f32> {
        let tokens = self.model.token_tensor(&batch.tokens)?;
        let ctx = self.model.context(self.config.initial_state, batch.len())?;
        let decoded = self.model.decode(&tokens, &ctx)?;

        let mut correct = 0usize;
        let mut total = 0usize;
        for (pred, gold) in decoded.iter().zip(&batch.labels) {
            correct += pred.path.iter().zip(gold).filter(|(p, g)| p == g).count();
            total += gold.len();
        }

        let accuracy = if total > 0 {
            correct as f32 / total as f32
        } else {
            0.0
        };
        debug!(correct, total, accuracy, "evaluation");
        Ok(accuracy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_validation() {
        assert!(Batch::new(vec![], vec![]).is_err());
        assert!(Batch::new(vec![vec![1, 2]], vec![]).is_err());
        assert!(Batch::new(vec![vec![1, 2], vec![3]], vec![vec![0, 0], vec![0]]).is_err());
        assert!(Batch::new(vec![vec![1, 2]], vec![vec![0]]).is_err());

        let batch = Batch::new(vec![vec![1, 2]], vec![vec![0, 1]]).unwrap();
        assert_eq!(batch.len(), 1);
        assert!(!batch.is_empty());
    }

    #[test]
    fn config_defaults() {
        let config: TrainerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TrainerConfig::default());
        assert_eq!(config.learning_rate, 0.01);
        assert_eq!(config.initial_state, InitialState::Random);

        let config: TrainerConfig =
            serde_json::from_str(r#"{"learning_rate": 0.1, "initial_state": "zeros"}"#).unwrap();
        assert_eq!(config.learning_rate, 0.1);
        assert_eq!(config.initial_state, InitialState::Zeros);
    }
}
