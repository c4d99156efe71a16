//! Error handling for the playback backend using `thiserror` and `anyhow`.
//!
//! Domain errors describe what went wrong inside the backend precisely enough
//! to be mapped onto an [`ErrorCategory`](crate::backend::ErrorCategory);
//! operational helpers attach context for the binary's logs.

pub mod domain;
pub mod operational;

pub use {
    domain::{BackendError, ConstructionError, NativeRuntimeError},
    operational::{ErrorReporter, ResultExt},
};
