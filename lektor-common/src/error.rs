//! Common error types for lektor

use thiserror::Error;

use crate::model::JobStatus;

/// Common result type for lektor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the lektor binaries
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter (not retried)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Job status change violating the legal transition table
    #[error("Illegal job transition: {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    /// TTS model failure on one chunk (retried up to the configured limit)
    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    /// A pipeline stage failed; the chunk has no usable audio
    #[error("Pipeline stage '{stage}' failed: {message}")]
    PipelineStage { stage: String, message: String },

    /// Transcoder (normalize/encode) failure
    #[error("Transcode error: {0}")]
    Transcode(String),

    /// HTTP client or server error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
