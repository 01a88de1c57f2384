//! Linear-chain CRF: transition matrix, path scoring, the forward
//! algorithm, Viterbi decoding and the batch loss, in scalar and tensor form.

pub mod emissions;
pub mod layer;
pub mod loss;
pub mod scoring;
pub mod transitions;
pub mod viterbi;

pub use emissions::Emissions;
pub use layer::CrfLayer;
pub use loss::{neg_log_likelihood, Reduction};
pub use scoring::{log_sum_exp, real_path_score, total_score};
pub use transitions::TransitionMatrix;
pub use viterbi::{viterbi_decode, Decoded, ViterbiDecoder};
