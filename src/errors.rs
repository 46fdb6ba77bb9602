//! Typed error hierarchy for the council pipeline.
//!
//! Three top-level enums cover the three failure surfaces:
//! - `BackendError`: text-generation backend calls
//! - `WorkflowError`: stage execution and artifact persistence
//! - `MaterializeError`: turning generated code into files

use std::path::PathBuf;
use thiserror::Error;

/// Errors from a single text-generation backend call.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Request to backend '{backend}' failed: {source}")]
    Request {
        backend: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Backend '{backend}' timed out after {secs}s")]
    Timeout { backend: String, secs: u64 },

    #[error("Backend '{backend}' returned HTTP {status}: {body}")]
    Status {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("Backend '{backend}' returned an unreadable response: {message}")]
    InvalidResponse { backend: String, message: String },
}

/// Errors from the workflow engine.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Stage {stage} failed")]
    StageFailed {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to write artifact at {path}: {source}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No text-generation backends are configured")]
    NoBackends,
}

/// Errors from code materialization.
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("Refusing to write outside the code root: {label}")]
    UnsafePath { label: String },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
