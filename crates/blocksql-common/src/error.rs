//! Error types for blocksql

use thiserror::Error;

/// Result type alias for blocksql operations
pub type Result<T> = std::result::Result<T, BlocksqlError>;

/// Main error type for blocksql
#[derive(Error, Debug)]
pub enum BlocksqlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown asset: {0}")]
    UnknownAsset(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
