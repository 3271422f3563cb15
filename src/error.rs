//! Error types shared by every stage of training.

use thiserror::Error;

/// Structural faults surfaced by the sampling core and its loaders.
///
/// None of these are transient: a caller receiving one should abort the run.
#[derive(Debug, Error)]
pub enum LdaError {
    /// A sparse row or document counter ran out of probe positions.
    #[error("hash table is full: topic {topic} does not fit into capacity {capacity}")]
    TableFull { topic: u32, capacity: usize },

    /// A count was driven below zero, which means a delta was lost or doubled upstream.
    #[error("negative count {count} for topic {topic}")]
    NegativeCount { topic: u32, count: i64 },

    /// Aggregated counts disagree with what the corpus implies.
    #[error("{what}: expected {expected}, found {actual}")]
    CountMismatch { what: String, expected: i64, actual: i64 },

    #[error("word id {word} is outside the vocabulary of size {num_vocabs}")]
    WordOutOfRange { word: i64, num_vocabs: usize },

    /// A word was routed to a model slice that does not hold its row.
    #[error("word {word} has no row in model slice {slice}")]
    UnknownWord { word: u32, slice: usize },

    #[error("topic id {topic} is outside [0, {num_topics})")]
    TopicOutOfRange { topic: i64, num_topics: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A binary data block does not follow the expected layout.
    #[error("malformed data block: {0}")]
    Format(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LdaError>;
