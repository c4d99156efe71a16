//! Notifications published by a backend thread.

use serde::{Deserialize, Serialize};

use crate::backend::native::NativeErrorKind;

/// Playback state as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayingState {
    /// No file loaded.
    #[default]
    Idle,
    /// A pipeline is being built.
    Loading,
    /// A file is loaded and positioned at the start of the play window.
    Stopped,
    /// Playing.
    Playing,
    /// Paused mid-stream.
    Paused,
    /// The last load failed. Only a new load leaves this state.
    Error,
}

/// Error classes surfaced to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// File missing, unreadable or in an unsupported format.
    Construction,
    /// Codec failure while playing.
    Decode,
    /// Source I/O failure while playing.
    Io,
    /// Output device failure.
    Output,
    /// Native resources exhausted.
    Resource,
}

impl From<NativeErrorKind> for ErrorCategory {
    fn from(kind: NativeErrorKind) -> Self {
        match kind {
            NativeErrorKind::Decode => ErrorCategory::Decode,
            NativeErrorKind::Io => ErrorCategory::Io,
            NativeErrorKind::Output => ErrorCategory::Output,
            NativeErrorKind::Resource => ErrorCategory::Resource,
        }
    }
}

/// Event delivered to subscribers, in the order the backend thread produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackendEvent {
    /// The playing state changed.
    StateChanged(PlayingState),
    /// Position inside the play window, in milliseconds.
    PositionChanged(i64),
    /// Duration of the play window became known, in milliseconds.
    DurationChanged(i64),
    /// A file was loaded successfully.
    Loaded,
    /// Playback reached the end of the stream or of the play window.
    Finished,
    /// Output volume changed, `0..=100`.
    VolumeChanged(i32),
    /// Loading or playback failed.
    Error {
        /// Class of the failure.
        category: ErrorCategory,
        /// Description from the failing component.
        message: String,
    },
}
