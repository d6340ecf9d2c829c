//! Argument and parsing errors surfaced to callers.
//!
//! Invariant violations (matrix shape mismatches, asymmetric covariance,
//! landmark-count desync) are programmer errors and are not represented
//! here; they are caught by `assert!`/`debug_assert!` and abort the
//! process, since they indicate state corruption rather than a reportable
//! condition.

use thiserror::Error;

/// Errors produced at the boundary of the crate: bad configuration, bad
/// serialized input, or malformed geometric arguments.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed collision map serialization at line {line}: {reason}")]
    ParseCollisionMap { line: usize, reason: String },

    #[error("rectangle corners do not form a valid rectangle: {0}")]
    InvalidRectangle(String),
}

pub type Result<T> = std::result::Result<T, Error>;
