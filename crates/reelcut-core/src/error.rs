//! Error types for reelcut.

use thiserror::Error;

/// Main error type for reelcut operations.
#[derive(Error, Debug)]
pub enum ReelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Muxer error: {0}")]
    Muxer(String),

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("Shader compilation error: {0}")]
    Shader(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Timeline error: {0}")]
    Timeline(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Export cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for reelcut operations.
pub type Result<T> = std::result::Result<T, ReelError>;
