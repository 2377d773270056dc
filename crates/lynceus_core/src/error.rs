//! Error types shared across the lynceus crates.

use crate::sbuf::RangeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Path missing or not openable
    #[error("no such file: {0}")]
    NoSuchFile(String),

    /// Format recognized but support not built in, or operation not
    /// available on this source kind
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Caller misuse (segmented-image parts inside a recursed directory,
    /// inconsistent split-image naming)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Short read or I/O failure mid-stream
    #[error("read error at offset {offset}: {message}")]
    ReadError { offset: u64, message: String },

    /// Normal iterator terminator, not a failure
    #[error("end of image")]
    EndOfImage,

    /// Typed read past the end of a PageBuffer
    #[error(transparent)]
    OutOfRange(#[from] RangeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
