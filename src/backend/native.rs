//! Seam between the backend thread and the native playback framework.
//!
//! The backend thread never touches decoders or devices directly. It drives
//! a [`NativePipeline`] built by a [`PipelineFactory`] and listens to the
//! messages the pipeline posts on its bus, much like a `playbin` element and
//! its `GstBus`.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
};

use {
    async_channel::Sender,
    serde::{Deserialize, Serialize},
};

use crate::error::{ConstructionError, NativeRuntimeError};

/// Sending half of a pipeline's message bus.
pub type BusSender = Sender<NativeMessage>;

/// State of the native playback graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NativeState {
    /// Nothing allocated.
    Null,
    /// Resources allocated, no data flowing.
    Ready,
    /// Data prerolled, clock stopped.
    Paused,
    /// Clock running.
    Playing,
}

/// Category of a failure reported by the native framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NativeErrorKind {
    /// Codec could not decode a packet.
    Decode,
    /// Reading the media source failed.
    Io,
    /// The output device failed or disappeared.
    Output,
    /// A native resource could not be allocated.
    Resource,
}

impl Display for NativeErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            NativeErrorKind::Decode => "Decode",
            NativeErrorKind::Io => "IO",
            NativeErrorKind::Output => "Output",
            NativeErrorKind::Resource => "Resource",
        };
        write!(f, "{name}")
    }
}

/// Asynchronous notification posted on a pipeline bus.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeMessage {
    /// The pipeline finished a state transition.
    StateChanged {
        /// State before the transition.
        old: NativeState,
        /// State after the transition.
        new: NativeState,
    },
    /// The pipeline learned (or re-learned) the stream duration.
    DurationChanged,
    /// A clock was selected for the pipeline.
    NewClock,
    /// All data has been rendered.
    EndOfStream {
        /// Data flow the message belongs to.
        seqnum: u64,
    },
    /// A state change or flushing seek completed.
    AsyncDone,
    /// A fatal error while running.
    Error {
        /// Data flow the message belongs to.
        seqnum: u64,
        error: NativeRuntimeError,
    },
}

impl NativeMessage {
    /// Data flow a streaming message was posted from.
    ///
    /// Only messages raised by streaming threads carry one; they can still
    /// sit on the bus after a flushing seek replaced their flow.
    #[must_use]
    pub fn seqnum(&self) -> Option<u64> {
        match self {
            NativeMessage::EndOfStream { seqnum } | NativeMessage::Error { seqnum, .. } => {
                Some(*seqnum)
            }
            _ => None,
        }
    }
}

/// Playback graph for a single media file.
///
/// A pipeline is built, driven and dropped on the backend thread only, so
/// implementations may hold handles that are not `Send`.
pub trait NativePipeline {
    /// Requests a state transition. Completion is reported on the bus.
    fn set_state(&mut self, state: NativeState);

    /// Performs a flushing seek to `position_ms` from the start of the stream.
    ///
    /// Returns `false` when the pipeline refused the target.
    fn seek(&mut self, position_ms: i64) -> bool;

    /// Current stream position in milliseconds, if known.
    fn query_position(&self) -> Option<i64>;

    /// Stream duration in milliseconds, if known.
    fn query_duration(&self) -> Option<i64>;

    /// Sets linear output gain, `0.0..=1.0`.
    fn set_volume(&mut self, volume: f64);

    /// Current linear output gain.
    fn volume(&self) -> f64;

    /// Sequence number of the current data flow.
    ///
    /// Every flushing seek and every teardown starts a new flow. Streaming
    /// messages tagged with another number are stale.
    fn seqnum(&self) -> u64;
}

/// Builds a fresh [`NativePipeline`] for each loaded file.
pub trait PipelineFactory: Send + Sync {
    /// Constructs a pipeline targeting `path` that posts on `bus`.
    ///
    /// # Errors
    ///
    /// Returns `ConstructionError` for missing files, unsupported formats or
    /// exhausted native resources.
    fn build(
        &self,
        path: &Path,
        bus: BusSender,
    ) -> Result<Box<dyn NativePipeline>, ConstructionError>;
}
