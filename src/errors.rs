// src/errors.rs

//! Crate-wide error type and result alias.

use std::time::Duration;

use thiserror::Error;

use crate::types::HashAlgorithm;

#[derive(Error, Debug)]
pub enum ReprodError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The path through the raw graph that revisits itself, first node repeated last.
    #[error("Cycle detected in dependency graph: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("Not cacheable: {0}")]
    NotCacheable(String),

    #[error("Invalid canonical form: {0}")]
    InvalidCanonicalForm(String),

    #[error("Digest mismatch for {location}: {algorithm} expected {expected}, found {actual}")]
    DigestMismatch {
        location: String,
        algorithm: HashAlgorithm,
        expected: String,
        actual: String,
    },

    #[error("Missing external input: {0}")]
    MissingInput(String),

    #[error("Task {uid} is incompatible with compute environment '{env}': {reason}")]
    IncompatibleTask {
        uid: String,
        env: String,
        reason: String,
    },

    #[error("Transient IO failure: {0}")]
    TransientIo(String),

    #[error("Operation timed out after {0:?}: {1}")]
    Timeout(Duration, String),

    #[error("Job {uid} failed: {message}")]
    JobExecutionFailed { uid: String, message: String },

    #[error("Job {uid} exhausted after {attempts} attempt(s): {last_error}")]
    Exhausted {
        uid: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Job {uid} cancelled: dependency {cause} did not complete")]
    Cancelled { uid: String, cause: String },

    #[error("No such object: {0}")]
    NoSuchObject(String),

    #[error("Storage error at {location}: {message}")]
    Storage { location: String, message: String },

    #[error("{failed} of {total} verification request(s) failed")]
    VerificationFailed { failed: usize, total: usize },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReprodError {
    /// Failures worth another attempt under the retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReprodError::TransientIo(_) | ReprodError::Timeout(..) | ReprodError::IoError(_)
        )
    }

    pub(crate) fn storage(location: &str, message: impl std::fmt::Display) -> Self {
        ReprodError::Storage {
            location: location.to_string(),
            message: message.to_string(),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ReprodError>;
