//! Translation of native bus messages into backend events.
//!
//! The backend thread drains the pipeline bus and feeds every message through
//! a [`BusAdapter`]. The adapter is stateful only to drop redundant
//! notifications; it never reorders.

use tracing::{debug, trace};

use crate::{
    backend::native::{NativeMessage, NativeState},
    error::NativeRuntimeError,
};

/// Message after filtering, ready for the backend thread to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// The native pipeline settled in a new state.
    StateChanged(NativeState),
    /// The duration may be known now; the thread should query it.
    QueryDuration,
    /// All data has been rendered.
    EndOfStream,
    /// The pipeline failed while running.
    Error(NativeRuntimeError),
}

/// Stateful filter over one pipeline's bus.
#[derive(Debug, Default)]
pub struct BusAdapter {
    last_state: Option<NativeState>,
    duration_known: bool,
}

impl BusAdapter {
    /// Creates an adapter for a fresh pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets everything learned about the previous pipeline.
    pub fn reset(&mut self) {
        self.last_state = None;
        self.duration_known = false;
    }

    /// Records that the thread obtained a valid duration.
    ///
    /// Later clock notifications are then dropped.
    pub fn mark_duration_known(&mut self) {
        self.duration_known = true;
    }

    /// Whether a duration has been obtained for the current pipeline.
    #[must_use]
    pub fn duration_known(&self) -> bool {
        self.duration_known
    }

    /// Translates one native message, or drops it as irrelevant.
    pub fn translate(&mut self, message: NativeMessage) -> Option<BusEvent> {
        match message {
            NativeMessage::StateChanged { old, new } => {
                if self.last_state == Some(new) {
                    trace!(?old, ?new, "Dropping redundant state change");
                    return None;
                }
                self.last_state = Some(new);
                Some(BusEvent::StateChanged(new))
            }
            NativeMessage::DurationChanged => Some(BusEvent::QueryDuration),
            // Not every container announces its duration, but every pipeline
            // selects a clock once it prerolls.
            NativeMessage::NewClock if !self.duration_known => Some(BusEvent::QueryDuration),
            NativeMessage::NewClock => {
                trace!("Dropping clock change, duration already known");
                None
            }
            NativeMessage::AsyncDone => None,
            NativeMessage::EndOfStream { .. } => Some(BusEvent::EndOfStream),
            NativeMessage::Error { error, .. } => {
                debug!("Native pipeline posted error: {error}");
                Some(BusEvent::Error(error))
            }
        }
    }
}
