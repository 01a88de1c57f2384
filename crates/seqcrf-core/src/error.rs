use thiserror::Error;

/// Errors that can occur while scoring, decoding or encoding sequences.
#[derive(Debug, Error)]
pub enum SeqCrfError {
    /// A sequence with zero timesteps was supplied.
    #[error("sequence is empty: at least one timestep is required")]
    EmptySequence,

    /// A batch with zero sequences was supplied.
    #[error("batch is empty")]
    EmptyBatch,

    /// The emission matrix and the label sequence disagree on length.
    #[error("length mismatch: emissions have {emissions} timesteps, labels have {labels}")]
    LengthMismatch {
        /// Timesteps in the emission matrix.
        emissions: usize,
        /// Entries in the label sequence.
        labels: usize,
    },

    /// A matrix or tensor has an unexpected dimension.
    #[error("{what} dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// What was being checked.
        what: &'static str,
        /// Expected size.
        expected: usize,
        /// Actual size.
        got: usize,
    },

    /// NaN or infinity found in an input matrix.
    #[error("non-finite value in {what}")]
    NonFinite {
        /// Which input contained the value.
        what: &'static str,
    },

    /// A label index is not a valid tag.
    #[error("tag index {tag} out of range for {num_tags} tags")]
    TagOutOfRange {
        /// The offending tag index.
        tag: usize,
        /// Number of tags in the model.
        num_tags: usize,
    },

    /// A START or STOP index appeared inside a ground-truth label sequence.
    #[error("sentinel tag {tag} cannot appear in a label sequence")]
    SentinelLabel {
        /// The offending tag index.
        tag: usize,
    },

    /// A token index is outside the embedding vocabulary.
    #[error("token index {token} out of range for vocabulary of size {vocab_size}")]
    TokenOutOfRange {
        /// The offending token index.
        token: u32,
        /// Size of the embedding vocabulary.
        vocab_size: usize,
    },

    /// The tag vocabulary is malformed.
    #[error("invalid tag vocabulary: {0}")]
    InvalidVocabulary(String),

    /// The model configuration is malformed.
    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),

    /// Reading a configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration document could not be parsed.
    #[error("configuration parse error: {0}")]
    Config(#[from] serde_json::Error),

    /// Candle ML framework error.
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for seqcrf operations.
pub type Result<T> = std::result::Result<T, SeqCrfError>;
