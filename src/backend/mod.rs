//! Playback backend.
//!
//! A [`BackendThread`] wraps one native pipeline on its own OS thread and
//! publishes state, position and duration notifications. The pipeline itself
//! sits behind the [`NativePipeline`] seam; [`SymphoniaPipeline`] decodes with
//! symphonia and renders through cpal. [`StandardBackend`] pairs a main and a
//! preview thread the way a music player uses them.

pub mod bus;
pub mod decoder;
pub mod events;
pub mod native;
pub mod output;
pub mod pipeline;
pub mod resampler;
pub mod section;
pub mod standard;
pub mod thread;

#[cfg(test)]
pub mod fake;
#[cfg(test)]
mod thread_tests;

pub use {
    events::{BackendEvent, ErrorCategory, PlayingState},
    native::{NativeErrorKind, NativeMessage, NativePipeline, NativeState, PipelineFactory},
    pipeline::{SymphoniaPipeline, SymphoniaPipelineFactory},
    section::SectionTracker,
    standard::StandardBackend,
    thread::{BackendThread, MAX_VOLUME, MIN_VOLUME, ThreadConfig},
};
