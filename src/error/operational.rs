//! Operational error context propagation with `anyhow`.
//!
//! The library itself returns domain errors; the binary wraps them with
//! context through [`ResultExt`] and funnels everything it has to tell the
//! user through [`ErrorReporter`].

use std::{error::Error as StdError, fmt::Display};

use {
    anyhow::{Context, Error, Result as AnyhowResult},
    tracing::error,
};

use crate::backend::events::ErrorCategory;

/// Extension trait for attaching context to domain errors.
pub trait ResultExt<T, E> {
    /// Adds context to an error with a static string.
    fn add_context(self, context: &'static str) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static;

    /// Adds context to an error with a formatted string.
    fn add_contextf(self, format: impl Display) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static;
}

impl<T, E> ResultExt<T, E> for Result<T, E> {
    fn add_context(self, context: &'static str) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static,
    {
        self.context(context)
    }

    fn add_contextf(self, format: impl Display) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static,
    {
        self.context(format.to_string())
    }
}

/// Centralized reporting of errors that reach the user.
pub struct ErrorReporter;

impl ErrorReporter {
    /// Logs a non-recoverable operational error.
    pub fn error(error: &Error, context: &str) {
        error!(context = context, error = %error, "Unrecoverable error");
    }

    /// Logs an error notification published by a backend thread.
    pub fn backend_event(category: ErrorCategory, message: &str) {
        error!(category = ?category, "Playback error: {message}");
    }

    /// Formats an error chain as a single line, outermost context first.
    pub fn to_user_message(error: &Error) -> String {
        error
            .chain()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(": ")
    }
}
