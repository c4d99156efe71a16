//! Pipeplay - threaded playback backend
//!
//! A playback backend that runs each native media pipeline on its own
//! thread, restricts playback to play windows (sections) of a track, and
//! reports state, position and duration changes to subscribers in the order
//! they happen. The shipped pipeline decodes with symphonia and renders
//! through cpal.

pub mod backend;
pub mod config;
pub mod error;

// Re-export key types for convenience
pub use {
    backend::{
        BackendEvent, BackendThread, ErrorCategory, PlayingState, SectionTracker,
        StandardBackend, SymphoniaPipelineFactory, ThreadConfig,
    },
    config::{BackendSettings, SettingsManager},
    error::{BackendError, ConstructionError},
};
