//! # seqcrf Trainer
//!
//! Gradient-based training step for the BiGRU-CRF model. The transition
//! matrix and encoder weights are only ever mutated here, between calls,
//! by the AdamW optimizer.

pub mod trainer;

pub use trainer::{Batch, Trainer, TrainerConfig};
