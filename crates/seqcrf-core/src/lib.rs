//! # seqcrf core
//!
//! Sequence labeling with a bidirectional GRU encoder and a linear-chain
//! CRF output layer. The CRF scores a labeled path, computes the log
//! partition function with the forward algorithm, and decodes the best
//! path with Viterbi, all by dynamic programming over a transition matrix.
//!
//! ## Quick Start
//!
//! ```rust
//! use seqcrf_core::crf::{total_score, viterbi_decode, Emissions, TransitionMatrix};
//!
//! let emissions = Emissions::from_rows(&[vec![1.0, 0.2], vec![0.1, 0.9]]).unwrap();
//! let transitions = TransitionMatrix::from_rows(&[vec![0.0, 0.5], vec![0.0, 0.3]]).unwrap();
//!
//! let best = viterbi_decode(&emissions, &transitions).unwrap();
//! assert_eq!(best.path, vec![0, 1]);
//! assert!(total_score(&emissions, &transitions).unwrap() >= best.score);
//! ```
pub mod config;
pub mod crf;
pub mod encoder;
pub mod error;
pub mod model;
pub mod tags;

// Re-export primary API
pub use config::ModelConfig;
pub use crf::{CrfLayer, Decoded, Emissions, Reduction, TransitionMatrix, ViterbiDecoder};
pub use encoder::{BiGruEncoder, EncoderContext, InitialState};
pub use error::{Result, SeqCrfError};
pub use model::BiGruCrf;
pub use tags::{TagVocabulary, START_TAG, STOP_TAG};
