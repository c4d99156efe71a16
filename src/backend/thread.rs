//! Playback thread wrapping one native pipeline at a time.
//!
//! Every [`BackendThread`] owns a dedicated OS thread running a current-thread
//! tokio runtime. Callers queue commands and read a cached snapshot; only the
//! thread touches the pipeline. Native bus messages and the position tick are
//! multiplexed with the command queue in a single `select!` loop, so commands
//! execute in submission order and notifications leave in production order.

use std::{
    future::pending,
    mem::take,
    path::{Path, PathBuf},
    sync::Arc,
    thread::{Builder as ThreadBuilder, JoinHandle},
    time::Duration,
};

use {
    async_channel::{Receiver, Sender, bounded, unbounded},
    parking_lot::{Mutex, RwLock},
    tokio::{
        runtime::Builder,
        select,
        time::{MissedTickBehavior, interval},
    },
    tracing::{debug, error, info, warn},
};

use crate::{
    backend::{
        bus::{BusAdapter, BusEvent},
        events::{BackendEvent, PlayingState},
        native::{NativeMessage, NativePipeline, NativeState, PipelineFactory},
        section::SectionTracker,
    },
    error::{BackendError, ConstructionError, NativeRuntimeError},
};

/// Lowest accepted volume.
pub const MIN_VOLUME: i32 = 0;

/// Highest accepted volume.
pub const MAX_VOLUME: i32 = 100;

/// Construction parameters for a [`BackendThread`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadConfig {
    /// OS thread name, also used as the logging target label.
    pub name: String,
    /// Interval of position notifications while playing.
    pub tick_interval: Duration,
    /// Volume applied to the first loaded pipeline.
    pub initial_volume: i32,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            name: "pipeplay-main".to_string(),
            tick_interval: Duration::from_millis(200),
            initial_volume: MAX_VOLUME,
        }
    }
}

/// Values readable without a round trip to the thread.
#[derive(Debug, Clone, Default)]
struct Snapshot {
    state: PlayingState,
    file_path: Option<PathBuf>,
    /// Last absolute stream position reported by the pipeline.
    absolute_position: i64,
    section: SectionTracker,
    /// Section requests queued but not yet handled by the thread.
    pending_sections: u32,
    volume: i32,
}

impl Snapshot {
    /// Clears the window unless a queued request will install one.
    fn reset_section(&mut self) {
        if self.pending_sections > 0 {
            self.section.clear_total_duration();
        } else {
            self.section.reset();
        }
    }

    fn relative_position(&self) -> i64 {
        let relative = self.section.to_relative(self.absolute_position);
        match self.section.duration() {
            duration if duration > 0 => relative.clamp(0, duration),
            _ => relative.max(0),
        }
    }
}

/// Playback parameters captured by [`BackendThread::save`].
#[derive(Debug, Clone, PartialEq)]
struct PendingRestore {
    path: PathBuf,
    absolute_position: i64,
    state: PlayingState,
    /// Requested window; the total duration comes from the rebuilt pipeline.
    section: Option<(i64, i64)>,
}

#[derive(Debug)]
enum Command {
    Load {
        path: PathBuf,
        reply: Sender<Result<(), ConstructionError>>,
    },
    Play,
    Pause,
    Stop,
    Reset,
    SetVolume(i32),
    SetPosition(i64),
    SetSection {
        start: i64,
        duration: i64,
    },
    Save,
    Restore(Option<PathBuf>),
    Shutdown,
}

type Subscribers = Arc<Mutex<Vec<Sender<BackendEvent>>>>;

/// Handle to a playback thread. Clones share the same thread.
#[derive(Clone)]
pub struct BackendThread {
    name: Arc<str>,
    shared: Arc<RwLock<Snapshot>>,
    subscribers: Subscribers,
    command_tx: Sender<Command>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl BackendThread {
    /// Spawns the thread. Pipelines are built with `factory`.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::SpawnFailed` if the OS refuses the thread.
    pub fn new(
        factory: Arc<dyn PipelineFactory>,
        config: ThreadConfig,
    ) -> Result<Self, BackendError> {
        let volume = config.initial_volume.clamp(MIN_VOLUME, MAX_VOLUME);
        let shared = Arc::new(RwLock::new(Snapshot {
            volume,
            ..Snapshot::default()
        }));
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));
        let (command_tx, command_rx) = unbounded();

        let worker_shared = Arc::clone(&shared);
        let worker_subscribers = Arc::clone(&subscribers);
        let worker_config = config.clone();
        let handle = ThreadBuilder::new()
            .name(config.name.clone())
            .spawn(move || {
                Worker::new(factory, worker_config, worker_shared, worker_subscribers)
                    .run(command_rx);
            })?;

        debug!(thread = %config.name, "Backend thread started");

        Ok(BackendThread {
            name: Arc::from(config.name),
            shared,
            subscribers,
            command_tx,
            worker: Arc::new(Mutex::new(Some(handle))),
        })
    }

    fn send(&self, command: Command) {
        if self.command_tx.try_send(command).is_err() {
            warn!(thread = %self.name, "Backend thread is gone, dropping command");
        }
    }

    /// Replaces the current pipeline with one playing `path`.
    ///
    /// Blocks until the pipeline is built. On success the thread is
    /// `Stopped` at the start of the track with position and duration reset.
    ///
    /// # Returns
    ///
    /// `false` if the pipeline could not be built; an error event follows.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> bool {
        self.load(path).is_ok()
    }

    /// Like [`BackendThread::load_file`], but returns why loading failed.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Construction` if the pipeline could not be
    /// built, or `BackendError::ThreadGone` if the thread has exited.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<(), BackendError> {
        let (reply, reply_rx) = bounded(1);
        let command = Command::Load {
            path: path.as_ref().to_path_buf(),
            reply,
        };
        if self.command_tx.try_send(command).is_err() {
            warn!(thread = %self.name, "Backend thread is gone, cannot load file");
            return Err(BackendError::ThreadGone);
        }
        reply_rx
            .recv_blocking()
            .map_err(|_| BackendError::ThreadGone)??;
        Ok(())
    }

    /// Starts or resumes playback.
    pub fn play(&self) {
        self.send(Command::Play);
    }

    /// Pauses playback.
    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    /// Pauses and rewinds to the start of the play window.
    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    /// Drops the pipeline and returns to `Idle`.
    pub fn reset(&self) {
        self.send(Command::Reset);
    }

    /// Sets the volume, clamped to `0..=100`.
    pub fn set_volume(&self, volume: i32) {
        let volume = volume.clamp(MIN_VOLUME, MAX_VOLUME);
        self.shared.write().volume = volume;
        self.send(Command::SetVolume(volume));
    }

    /// Current volume, `0..=100`.
    #[must_use]
    pub fn volume(&self) -> i32 {
        self.shared.read().volume
    }

    /// Position inside the play window in milliseconds.
    #[must_use]
    pub fn position(&self) -> i64 {
        self.shared.read().relative_position()
    }

    /// Duration of the play window in milliseconds, `0` while unknown.
    #[must_use]
    pub fn duration(&self) -> i64 {
        self.shared.read().section.duration()
    }

    /// Seeks to `position_ms` inside the play window, clamped to it.
    pub fn set_position(&self, position_ms: i64) {
        self.send(Command::SetPosition(position_ms));
    }

    /// Restricts playback to `[start, start + duration)`.
    ///
    /// A negative `start` clears the window; a non-positive `duration` runs
    /// the window to the end of the track.
    pub fn set_play_section(&self, start: i64, duration: i64) {
        {
            let mut shared = self.shared.write();
            shared.section.set_section(start, duration);
            shared.pending_sections += 1;
        }
        self.send(Command::SetSection { start, duration });
    }

    /// Whether a play window is installed.
    #[must_use]
    pub fn has_section(&self) -> bool {
        self.shared.read().section.has_section()
    }

    /// Current playing state.
    #[must_use]
    pub fn state(&self) -> PlayingState {
        self.shared.read().state
    }

    /// Path of the loaded file.
    #[must_use]
    pub fn file_path(&self) -> Option<PathBuf> {
        self.shared.read().file_path.clone()
    }

    /// Captures file, position and state, then releases the pipeline.
    ///
    /// Does nothing when no file is loaded.
    pub fn save(&self) {
        self.send(Command::Save);
    }

    /// Rebuilds the pipeline captured by [`BackendThread::save`].
    ///
    /// `updated_path` replaces the saved path when the file moved. Does
    /// nothing without a saved snapshot.
    pub fn restore(&self, updated_path: Option<PathBuf>) {
        self.send(Command::Restore(updated_path));
    }

    /// Subscribes to notifications.
    ///
    /// The receiver gets the current state immediately, then every event in
    /// production order.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<BackendEvent> {
        let (tx, rx) = unbounded();
        let _ = tx.try_send(BackendEvent::StateChanged(self.state()));
        self.subscribers.lock().push(tx);
        rx
    }

    /// Stops the thread after tearing down its pipeline.
    pub fn shutdown(&self) {
        debug!(thread = %self.name, "Shutting down backend thread");
        let _ = self.command_tx.try_send(Command::Shutdown);
        if let Some(handle) = self.worker.lock().take()
            && handle.join().is_err()
        {
            error!(thread = %self.name, "Backend thread panicked");
        }
    }
}

/// State owned by the playback thread.
struct Worker {
    name: String,
    factory: Arc<dyn PipelineFactory>,
    shared: Arc<RwLock<Snapshot>>,
    subscribers: Subscribers,
    pipeline: Option<Box<dyn NativePipeline>>,
    bus_rx: Option<Receiver<NativeMessage>>,
    adapter: BusAdapter,
    /// Last native state confirmed on the bus.
    native_state: Option<NativeState>,
    /// State the last command asked for.
    target: PlayingState,
    pending_restore: Option<PendingRestore>,
    tick_interval: Duration,
    ticking: bool,
    /// Set when ticking starts; the loop restarts the interval phase.
    restart_tick: bool,
}

async fn next_bus_message(bus: Option<&Receiver<NativeMessage>>) -> Option<NativeMessage> {
    match bus {
        Some(rx) => rx.recv().await.ok(),
        None => pending().await,
    }
}

impl Worker {
    fn new(
        factory: Arc<dyn PipelineFactory>,
        config: ThreadConfig,
        shared: Arc<RwLock<Snapshot>>,
        subscribers: Subscribers,
    ) -> Self {
        Worker {
            name: config.name,
            factory,
            shared,
            subscribers,
            pipeline: None,
            bus_rx: None,
            adapter: BusAdapter::new(),
            native_state: None,
            target: PlayingState::Idle,
            pending_restore: None,
            tick_interval: config.tick_interval,
            ticking: false,
            restart_tick: false,
        }
    }

    fn run(mut self, commands: Receiver<Command>) {
        let runtime = match Builder::new_current_thread().enable_time().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(thread = %self.name, "Failed to build backend runtime: {e}");
                return;
            }
        };

        runtime.block_on(async {
            let mut tick = interval(self.tick_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                if take(&mut self.restart_tick) {
                    tick.reset();
                }
                select! {
                    biased;

                    message = next_bus_message(self.bus_rx.as_ref()) => match message {
                        Some(message) => self.handle_message(message),
                        None => self.bus_rx = None,
                    },
                    command = commands.recv() => match command {
                        Ok(Command::Shutdown) | Err(_) => break,
                        Ok(command) => self.handle_command(command),
                    },
                    _ = tick.tick(), if self.ticking => self.on_tick(),
                }
            }
        });

        self.teardown_pipeline();
        debug!(thread = %self.name, "Backend thread stopped");
    }

    fn emit(&self, event: BackendEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.try_send(event.clone()).is_ok());
    }

    fn set_state(&mut self, state: PlayingState) {
        let changed = {
            let mut shared = self.shared.write();
            let changed = shared.state != state;
            shared.state = state;
            changed
        };
        let ticking = state == PlayingState::Playing;
        self.restart_tick |= ticking && !self.ticking;
        self.ticking = ticking;
        if changed {
            debug!(thread = %self.name, ?state, "Playing state changed");
            self.emit(BackendEvent::StateChanged(state));
        }
    }

    /// Asks the pipeline for the native state backing `target`. The playing
    /// state follows once the bus confirms it.
    fn request(&mut self, target: PlayingState) {
        let native = if target == PlayingState::Playing {
            NativeState::Playing
        } else {
            NativeState::Paused
        };
        self.target = target;
        if target != PlayingState::Playing {
            self.ticking = false;
        }
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.set_state(native);
        }
        if self.native_state == Some(native) {
            self.set_state(target);
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Load { path, reply } => {
                let result = self.load(path);
                let _ = reply.try_send(result);
            }
            Command::Play => self.play(),
            Command::Pause => {
                if self.pipeline.is_some() && self.target == PlayingState::Playing {
                    self.request(PlayingState::Paused);
                }
            }
            Command::Stop => self.stop(),
            Command::Reset => self.reset(),
            Command::SetVolume(volume) => {
                if let Some(pipeline) = self.pipeline.as_mut() {
                    pipeline.set_volume(f64::from(volume) / f64::from(MAX_VOLUME));
                }
                self.emit(BackendEvent::VolumeChanged(volume));
            }
            Command::SetPosition(position) => self.set_position(position),
            Command::SetSection { start, duration } => self.set_section(start, duration),
            Command::Save => self.save(),
            Command::Restore(updated_path) => self.restore(updated_path),
            Command::Shutdown => {}
        }
    }

    fn load(&mut self, path: PathBuf) -> Result<(), ConstructionError> {
        self.teardown_pipeline();
        {
            let mut shared = self.shared.write();
            shared.file_path = Some(path.clone());
            shared.absolute_position = 0;
            shared.reset_section();
        }
        self.target = PlayingState::Stopped;
        self.set_state(PlayingState::Loading);

        let (bus_tx, bus_rx) = unbounded();
        match self.factory.build(&path, bus_tx) {
            Ok(mut pipeline) => {
                let volume = self.shared.read().volume;
                pipeline.set_volume(f64::from(volume) / f64::from(MAX_VOLUME));
                self.pipeline = Some(pipeline);
                self.bus_rx = Some(bus_rx);
                // Factories hand out prerolled pipelines.
                self.native_state = Some(NativeState::Paused);
                info!(thread = %self.name, path = %path.display(), "Loaded file");
                self.set_state(PlayingState::Stopped);
                self.emit(BackendEvent::Loaded);
                Ok(())
            }
            Err(e) => {
                error!(thread = %self.name, path = %path.display(), "Failed to load file: {e}");
                self.target = PlayingState::Error;
                self.set_state(PlayingState::Error);
                self.emit(BackendEvent::Error {
                    category: e.category(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn play(&mut self) {
        if self.pipeline.is_none() {
            debug!(thread = %self.name, "Play requested without a pipeline");
            return;
        }
        let (outside, start) = {
            let shared = self.shared.read();
            (
                shared.section.is_outside(shared.absolute_position),
                shared.section.start(),
            )
        };
        if outside {
            self.seek_absolute(start);
        }
        self.request(PlayingState::Playing);
    }

    fn stop(&mut self) {
        if self.pipeline.is_none() {
            return;
        }
        self.request(PlayingState::Stopped);
        let start = self.shared.read().section.start();
        self.seek_absolute(start);
    }

    fn reset(&mut self) {
        self.teardown_pipeline();
        {
            let mut shared = self.shared.write();
            shared.file_path = None;
            shared.absolute_position = 0;
            shared.reset_section();
        }
        self.target = PlayingState::Idle;
        self.set_state(PlayingState::Idle);
    }

    /// Seeks the pipeline and publishes the new position. Refused targets are ignored.
    fn seek_absolute(&mut self, absolute: i64) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };
        if !pipeline.seek(absolute) {
            warn!(thread = %self.name, absolute, "Pipeline refused seek target, ignoring");
            return;
        }
        let relative = {
            let mut shared = self.shared.write();
            shared.absolute_position = absolute;
            shared.relative_position()
        };
        self.emit(BackendEvent::PositionChanged(relative));
    }

    fn set_position(&mut self, position: i64) {
        let absolute = {
            let shared = self.shared.read();
            let duration = shared.section.duration();
            let clamped = if duration > 0 {
                position.clamp(0, duration)
            } else {
                position.max(0)
            };
            if clamped != position {
                debug!(thread = %self.name, position, clamped, "Clamped seek target");
            }
            shared.section.to_absolute(clamped)
        };
        self.seek_absolute(absolute);
    }

    /// Applies a queued window. Only the newest queued request is installed,
    /// so an older one cannot overwrite what callers already read back.
    fn set_section(&mut self, start: i64, duration: i64) {
        {
            let mut shared = self.shared.write();
            shared.pending_sections = shared.pending_sections.saturating_sub(1);
            if shared.pending_sections > 0 {
                return;
            }
            shared.section.set_section(start, duration);
        }
        let (outside, start, duration_known, duration) = {
            let shared = self.shared.read();
            (
                shared.section.is_outside(shared.absolute_position),
                shared.section.start(),
                shared.section.total_duration().is_some(),
                shared.section.duration(),
            )
        };
        if outside && self.target != PlayingState::Playing {
            self.seek_absolute(start);
        }
        if duration_known {
            self.emit(BackendEvent::DurationChanged(duration));
        }
    }

    fn save(&mut self) {
        if self.pipeline.is_none() {
            debug!(thread = %self.name, "Nothing loaded, skipping save");
            return;
        }
        let absolute_position = self
            .pipeline
            .as_ref()
            .and_then(|pipeline| pipeline.query_position())
            .unwrap_or_else(|| self.shared.read().absolute_position);
        let restore = {
            let shared = self.shared.read();
            shared.file_path.clone().map(|path| PendingRestore {
                path,
                absolute_position,
                state: shared.state,
                section: shared.section.requested_window(),
            })
        };
        let Some(restore) = restore else {
            return;
        };
        debug!(thread = %self.name, ?restore, "Saved playback parameters");
        self.pending_restore = Some(restore);
        self.reset();
    }

    fn restore(&mut self, updated_path: Option<PathBuf>) {
        let Some(saved) = self.pending_restore.take() else {
            debug!(thread = %self.name, "Nothing saved, skipping restore");
            return;
        };
        let path = updated_path.unwrap_or(saved.path);
        if self.load(path).is_err() {
            return;
        }
        {
            let mut shared = self.shared.write();
            if shared.pending_sections == 0
                && let Some((start, duration)) = saved.section
            {
                shared.section.set_section(start, duration);
            }
        }
        self.seek_absolute(saved.absolute_position);
        match saved.state {
            PlayingState::Playing => self.request(PlayingState::Playing),
            PlayingState::Paused => self.request(PlayingState::Paused),
            _ => {}
        }
    }

    fn handle_message(&mut self, message: NativeMessage) {
        if let Some(seqnum) = message.seqnum()
            && self
                .pipeline
                .as_ref()
                .is_some_and(|pipeline| pipeline.seqnum() != seqnum)
        {
            debug!(thread = %self.name, ?message, "Dropping message from a flushed flow");
            return;
        }
        let Some(event) = self.adapter.translate(message) else {
            return;
        };
        match event {
            BusEvent::StateChanged(native) => {
                self.native_state = Some(native);
                let confirms = match native {
                    NativeState::Playing => self.target == PlayingState::Playing,
                    NativeState::Paused => matches!(
                        self.target,
                        PlayingState::Paused | PlayingState::Stopped
                    ),
                    NativeState::Ready | NativeState::Null => false,
                };
                if confirms {
                    self.set_state(self.target);
                }
            }
            BusEvent::QueryDuration => self.update_duration(),
            BusEvent::EndOfStream => self.finish(),
            BusEvent::Error(error) => self.fail(error),
        }
    }

    fn update_duration(&mut self) {
        let Some(total) = self
            .pipeline
            .as_ref()
            .and_then(|pipeline| pipeline.query_duration())
            .filter(|total| *total > 0)
        else {
            return;
        };
        let duration = {
            let mut shared = self.shared.write();
            if shared.section.total_duration() == Some(total) {
                return;
            }
            shared.section.update_total_duration(total);
            shared.section.duration()
        };
        self.adapter.mark_duration_known();
        debug!(thread = %self.name, total, duration, "Duration known");
        self.emit(BackendEvent::DurationChanged(duration));
    }

    fn on_tick(&mut self) {
        let Some(absolute) = self
            .pipeline
            .as_ref()
            .and_then(|pipeline| pipeline.query_position())
        else {
            return;
        };
        let (relative, reached_end) = {
            let mut shared = self.shared.write();
            shared.absolute_position = absolute;
            let reached_end = shared.section.has_section()
                && shared.section.end().is_some_and(|end| absolute >= end);
            (shared.relative_position(), reached_end)
        };
        self.emit(BackendEvent::PositionChanged(relative));
        if reached_end {
            debug!(thread = %self.name, "Reached end of play section");
            self.finish();
        }
    }

    fn finish(&mut self) {
        if self.pipeline.is_none() {
            return;
        }
        info!(thread = %self.name, "Playback finished");
        self.stop();
        self.emit(BackendEvent::Finished);
    }

    fn fail(&mut self, error: NativeRuntimeError) {
        error!(thread = %self.name, "Pipeline failed: {error}");
        self.emit(BackendEvent::Error {
            category: error.kind.into(),
            message: error.message.clone(),
        });
        self.reset();
    }

    /// Releases every native resource before returning.
    fn teardown_pipeline(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.set_state(NativeState::Null);
            drop(pipeline);
            debug!(thread = %self.name, "Pipeline torn down");
        }
        self.bus_rx = None;
        self.adapter.reset();
        self.native_state = None;
        self.ticking = false;
    }
}
