//! Scripted pipeline for exercising backend threads without audio hardware.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{
    backend::native::{
        BusSender, NativeMessage, NativePipeline, NativeState, PipelineFactory,
    },
    error::{ConstructionError, NativeRuntimeError},
};

/// What the fake reports and what it was asked to do.
#[derive(Debug, Default)]
pub struct FakeScript {
    /// Duration reported by `query_duration`.
    pub duration_ms: Option<i64>,
    /// Whether pipelines post `DurationChanged`; the clock message is always posted.
    pub announce_duration: bool,
    /// Paths whose construction fails.
    pub broken_paths: HashSet<PathBuf>,
    /// Position reported by `query_position`; seeks overwrite it.
    pub position_ms: i64,
    /// Seek targets in call order.
    pub seeks: Vec<i64>,
    /// Native states requested, in call order.
    pub requested_states: Vec<NativeState>,
    /// Last volume applied.
    pub volume: f64,
    /// Number of pipelines built.
    pub builds: usize,
    /// Bus of the newest pipeline, for injecting messages.
    pub bus: Option<BusSender>,
    /// Current data flow; every accepted seek starts a new one.
    pub seqnum: u64,
}

/// Factory handing out [`FakePipeline`]s that share one [`FakeScript`].
#[derive(Debug, Clone, Default)]
pub struct FakeFactory {
    pub script: Arc<Mutex<FakeScript>>,
}

impl FakeFactory {
    /// Creates a factory whose pipelines report `duration_ms`.
    pub fn with_duration(duration_ms: i64) -> Self {
        let factory = Self::default();
        {
            let mut script = factory.script.lock();
            script.duration_ms = Some(duration_ms);
            script.announce_duration = true;
        }
        factory
    }

    /// Sets the position the pipeline will report.
    pub fn set_position(&self, position_ms: i64) {
        self.script.lock().position_ms = position_ms;
    }

    /// Posts `message` on the newest pipeline's bus.
    pub fn post(&self, message: NativeMessage) {
        if let Some(bus) = self.script.lock().bus.as_ref() {
            let _ = bus.try_send(message);
        }
    }

    /// Posts a runtime error from the current data flow.
    pub fn fail(&self, error: NativeRuntimeError) {
        let seqnum = self.seqnum();
        self.post(NativeMessage::Error { seqnum, error });
    }

    /// Posts end of stream from the current data flow.
    pub fn end_of_stream(&self) {
        let seqnum = self.seqnum();
        self.post(NativeMessage::EndOfStream { seqnum });
    }

    /// Current data flow sequence number.
    pub fn seqnum(&self) -> u64 {
        self.script.lock().seqnum
    }

    /// Seek targets issued so far.
    pub fn seeks(&self) -> Vec<i64> {
        self.script.lock().seeks.clone()
    }
}

impl PipelineFactory for FakeFactory {
    fn build(
        &self,
        path: &Path,
        bus: BusSender,
    ) -> Result<Box<dyn NativePipeline>, ConstructionError> {
        let mut script = self.script.lock();
        if script.broken_paths.contains(path) {
            return Err(ConstructionError::NotFound {
                path: path.to_path_buf(),
            });
        }
        script.builds += 1;
        script.position_ms = 0;
        script.bus = Some(bus.clone());

        let _ = bus.try_send(NativeMessage::StateChanged {
            old: NativeState::Null,
            new: NativeState::Ready,
        });
        let _ = bus.try_send(NativeMessage::StateChanged {
            old: NativeState::Ready,
            new: NativeState::Paused,
        });
        if script.announce_duration {
            let _ = bus.try_send(NativeMessage::DurationChanged);
        }
        let _ = bus.try_send(NativeMessage::NewClock);
        let _ = bus.try_send(NativeMessage::AsyncDone);

        Ok(Box::new(FakePipeline {
            script: Arc::clone(&self.script),
            bus,
            state: NativeState::Paused,
        }))
    }
}

/// Pipeline that answers from a [`FakeScript`].
pub struct FakePipeline {
    script: Arc<Mutex<FakeScript>>,
    bus: BusSender,
    state: NativeState,
}

impl NativePipeline for FakePipeline {
    fn set_state(&mut self, state: NativeState) {
        self.script.lock().requested_states.push(state);
        if self.state != state {
            let _ = self.bus.try_send(NativeMessage::StateChanged {
                old: self.state,
                new: state,
            });
            self.state = state;
        }
    }

    fn seek(&mut self, position_ms: i64) -> bool {
        let mut script = self.script.lock();
        if position_ms < 0 || script.duration_ms.is_some_and(|duration| position_ms > duration) {
            return false;
        }
        script.seeks.push(position_ms);
        script.position_ms = position_ms;
        script.seqnum += 1;
        true
    }

    fn query_position(&self) -> Option<i64> {
        Some(self.script.lock().position_ms)
    }

    fn query_duration(&self) -> Option<i64> {
        self.script.lock().duration_ms
    }

    fn set_volume(&mut self, volume: f64) {
        self.script.lock().volume = volume;
    }

    fn volume(&self) -> f64 {
        self.script.lock().volume
    }

    fn seqnum(&self) -> u64 {
        self.script.lock().seqnum
    }
}
