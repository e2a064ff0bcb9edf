use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PenumbraError>;

#[derive(Debug, Error)]
pub enum PenumbraError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("corruption detected: {0}")]
    Corruption(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("cannot split bucket at depth {0}")]
    DepthOverflow(u8),
    #[error("index modified during iteration")]
    ConcurrentModification,
    #[error("cursor has no current entry")]
    NoCurrentEntry,
}
