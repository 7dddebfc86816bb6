//! Error taxonomy for the grading pipeline
//!
//! Only `Configuration` and `MissingInput` are allowed to become an
//! `internal_error` verdict. Provider and artifact failures are absorbed
//! into feedback or logs by the stage that hits them.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JudgeError {
    /// A compiler or tool could not be resolved from the runtime configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A required constraint/config file for a synthesis provider is absent
    #[error("Missing input file: {}", .0.display())]
    MissingInput(PathBuf),

    /// Talking to a synthesis provider failed
    #[error("Synthesis provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Waveform capture failed
    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl JudgeError {
    /// Whether this error must be surfaced as an internal-error verdict
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            JudgeError::Configuration(_) | JudgeError::MissingInput(_)
        )
    }
}

/// Transient failures talking to a synthesis provider (never retried)
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("request failed: {0}")]
    Request(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("empty response body")]
    EmptyBody,

    #[error("invalid response body: {0}")]
    InvalidBody(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_connect() {
            ProviderError::Connect(err.to_string())
        } else {
            ProviderError::Request(err.to_string())
        }
    }
}
