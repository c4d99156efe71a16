//! Domain-specific error types using `thiserror`.
//!
//! Only construction failures and runtime failures of the native pipeline
//! ever reach the caller. Invalid seek targets and invalid play sections
//! are clamped where they are handled and never become errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::{
    decoder::DecoderError,
    events::ErrorCategory,
    native::NativeErrorKind,
    output::OutputError,
};

/// Failure to build a playback pipeline for a file.
#[derive(Error, Debug)]
pub enum ConstructionError {
    /// The path does not name a readable file.
    #[error("File not found: {}", path.display())]
    NotFound { path: PathBuf },
    /// The decoder could not open the file.
    #[error("Decoder error: {0}")]
    DecoderError(#[from] DecoderError),
    /// The output device could not be opened.
    #[error("Output error: {0}")]
    OutputError(#[from] OutputError),
    /// A native resource (thread, buffer) could not be allocated.
    #[error("Resource exhausted: {reason}")]
    ResourceExhausted { reason: String },
}

impl ConstructionError {
    /// Category reported to listeners for this failure.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            ConstructionError::NotFound { .. } | ConstructionError::DecoderError(_) => {
                ErrorCategory::Construction
            }
            ConstructionError::OutputError(_) => ErrorCategory::Output,
            ConstructionError::ResourceExhausted { .. } => ErrorCategory::Resource,
        }
    }
}

/// A failure reported by a running pipeline (codec or I/O trouble mid-stream).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} error: {message}")]
pub struct NativeRuntimeError {
    /// What part of the native framework failed.
    pub kind: NativeErrorKind,
    /// Human readable description from the framework.
    pub message: String,
}

impl NativeRuntimeError {
    /// Creates a runtime error of the given kind.
    pub fn new(kind: NativeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Errors from talking to a backend thread.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend thread has exited and no longer accepts commands.
    #[error("Backend thread is not running")]
    ThreadGone,
    /// The backend thread could not be started.
    #[error("Failed to spawn backend thread: {0}")]
    SpawnFailed(#[from] std::io::Error),
    /// A pipeline could not be built.
    #[error("Construction error: {0}")]
    Construction(#[from] ConstructionError),
}
