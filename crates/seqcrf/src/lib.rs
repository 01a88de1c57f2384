//! # seqcrf
//!
//! Bidirectional GRU encoder with a linear-chain CRF output layer for
//! sequence labeling.
//!
//! - [`seqcrf_core`]: tag vocabulary, CRF scoring, forward algorithm, Viterbi
//!   decoding, encoder and model.
//! - [`seqcrf_trainer`]: optimizer step and evaluation.

pub use seqcrf_core;
pub use seqcrf_trainer;

pub use seqcrf_core::{
    BiGruCrf, CrfLayer, Decoded, EncoderContext, InitialState, ModelConfig, Reduction, Result,
    SeqCrfError, TagVocabulary, TransitionMatrix,
};
pub use seqcrf_trainer::{Batch, Trainer, TrainerConfig};
