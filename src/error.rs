//! Crate-wide error type.
//!
//! Mirrors the shape of a typical `thiserror` enum: one variant per error
//! kind named in the design, each carrying a human-readable message. The
//! core never catches its own errors (see `tree` and `ensemble`) — it only
//! ever produces them, and callers decide how to recover.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Column counts or roles at transform time differ from training.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A user-supplied hyperparameter is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A target column contains NaN or Inf.
    #[error("null value in target column: {0}")]
    NullInTarget(String),

    /// A requested bin or critical-value count exceeds the guard.
    #[error("numeric overflow: {0}")]
    NumericOverflow(String),

    /// `predict`/`transform` was called before `fit`.
    #[error("not fitted: {0}")]
    NotFitted(String),

    /// A persisted document is malformed.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Passthrough for the persistence layer's file I/O.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
