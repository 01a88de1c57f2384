//! # Model Configuration
//!
//! Hyperparameters of the BiGRU-CRF model. Every field has a default equal
//! to the reference model, so an empty JSON object is a valid config.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::crf::Reduction;
use crate::error::{Result, SeqCrfError};
use crate::tags::TagVocabulary;

fn default_vocab_size() -> usize {
    20
}

fn default_embedding_dim() -> usize {
    100
}

fn default_hidden_dim() -> usize {
    128
}

fn default_softmax() -> bool {
    true
}

/// Configuration for [`BiGruCrf`](crate::model::BiGruCrf).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of distinct token indices accepted by the embedding.
    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,
    /// Width of the word embedding.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    /// Hidden size of each GRU direction.
    #[serde(default = "default_hidden_dim")]
    pub hidden_dim: usize,
    /// Tag name to index mapping, sentinels included.
    #[serde(default)]
    pub tag_map: TagVocabulary,
    /// Normalize emission scores with a softmax over tags.
    #[serde(default = "default_softmax")]
    pub softmax_emissions: bool,
    /// How batch losses are combined.
    #[serde(default)]
    pub reduction: Reduction,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vocab_size: default_vocab_size(),
            embedding_dim: default_embedding_dim(),
            hidden_dim: default_hidden_dim(),
            tag_map: TagVocabulary::default(),
            softmax_emissions: default_softmax(),
            reduction: Reduction::default(),
        }
    }
}

impl ModelConfig {
    /// Create a configuration with the reference defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Check that every dimension is non-zero.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("vocab_size", self.vocab_size),
            ("embedding_dim", self.embedding_dim),
            ("hidden_dim", self.hidden_dim),
        ] {
            if value == 0 {
                return Err(SeqCrfError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        if u32::try_from(self.vocab_size).is_err() {
            return Err(SeqCrfError::InvalidConfig(format!(
                "vocab_size {} exceeds u32 token range",
                self.vocab_size
            )));
        }
        Ok(())
    }

    /// Number of tags, sentinels included.
    pub fn num_tags(&self) -> usize {
        self.tag_map.len()
    }

    pub fn with_vocab_size(mut self, vocab_size: usize) -> Self {
        self.vocab_size = vocab_size;
        self
    }

    pub fn with_embedding_dim(mut self, embedding_dim: usize) -> Self {
        self.embedding_dim = embedding_dim;
        self
    }

    pub fn with_hidden_dim(mut self, hidden_dim: usize) -> Self {
        self.hidden_dim = hidden_dim;
        self
    }

    pub fn with_tag_map(mut self, tag_map: TagVocabulary) -> Self {
        self.tag_map = tag_map;
        self
    }

    /// Enable or disable the softmax over emission scores.
    pub fn with_softmax(mut self, enabled: bool) -> Self {
        self.softmax_emissions = enabled;
        self
    }

    pub fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.reduction = reduction;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_uses_reference_defaults() {
        let config = ModelConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ModelConfig::default());
        assert_eq!(config.vocab_size, 20);
        assert_eq!(config.embedding_dim, 100);
        assert_eq!(config.hidden_dim, 128);
        assert_eq!(config.num_tags(), 6);
        assert!(config.softmax_emissions);
        assert_eq!(config.reduction, Reduction::Sum);
    }

    #[test]
    fn parses_custom_tag_map() {
        let config = ModelConfig::from_json_str(
            r#"{
                "vocab_size": 500,
                "hidden_dim": 32,
                "tag_map": {"O": 0, "B-PER": 1, "I-PER": 2, "START": 3, "STOP": 4},
                "softmax_emissions": false,
                "reduction": "mean"
            }"#,
        )
        .unwrap();
        assert_eq!(config.vocab_size, 500);
        assert_eq!(config.hidden_dim, 32);
        assert_eq!(config.embedding_dim, 100);
        assert_eq!(config.num_tags(), 5);
        assert_eq!(config.tag_map.start(), 3);
        assert!(!config.softmax_emissions);
        assert_eq!(config.reduction, Reduction::Mean);
    }

    #[test]
    fn rejects_zero_dimensions() {
        let err = ModelConfig::from_json_str(r#"{"hidden_dim": 0}"#).unwrap_err();
        assert!(err.to_string().contains("hidden_dim"));
    }

    #[test]
    fn rejects_bad_tag_map() {
        let err = ModelConfig::from_json_str(r#"{"tag_map": {"O": 0}}"#).unwrap_err();
        assert!(matches!(err, SeqCrfError::Config(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ModelConfig::from_file("/nonexistent/seqcrf/config.json").unwrap_err();
        assert!(matches!(err, SeqCrfError::Io(_)));
    }

    #[test]
    fn builder_setters() {
        let config = ModelConfig::new()
            .with_vocab_size(50)
            .with_embedding_dim(8)
            .with_hidden_dim(4)
            .with_softmax(false)
            .with_reduction(Reduction::Mean);
        assert_eq!(config.vocab_size, 50);
        assert_eq!(config.embedding_dim, 8);
        assert_eq!(config.hidden_dim, 4);
        assert!(!config.softmax_emissions);
        assert!(config.validate().is_ok());
    }
}
