//! Error types for the myco-db core.
//!
//! Library functions return [`Result<T>`], a crate-local alias over
//! [`DbError`]. The binaries wrap this in `anyhow` for stage-prefixed
//! reporting on stderr.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Capacity error: {0}")]
    Capacity(String),

    #[error("Argument error: {0}")]
    Argument(String),
}

pub type Result<T> = std::result::Result<T, DbError>;
