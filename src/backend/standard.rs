//! Main and preview playback threads behind one volume control.
//!
//! A music player plays the queue on the main thread and short clips (search
//! results, drag previews) on the preview thread. Both follow the same
//! volume and mute state. With smart volume the main thread is ducked while
//! a preview plays and brought back when the preview stops.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {parking_lot::Mutex, tracing::debug};

use crate::{
    backend::{
        events::PlayingState,
        native::PipelineFactory,
        thread::{BackendThread, MAX_VOLUME, MIN_VOLUME},
    },
    config::BackendSettings,
    error::BackendError,
};

/// Name of the main playback thread.
pub const MAIN_THREAD_NAME: &str = "pipeplay-main";

/// Name of the preview playback thread.
pub const PREVIEW_THREAD_NAME: &str = "pipeplay-preview";

#[derive(Debug, Clone, Copy)]
struct VolumeState {
    volume: i32,
    muted: bool,
    /// Main thread is lowered for a playing preview.
    ducked: bool,
}

/// Backend pairing a main and a preview [`BackendThread`].
pub struct StandardBackend {
    main: BackendThread,
    preview: BackendThread,
    volume: Mutex<VolumeState>,
    volume_step: i32,
    smart_volume_percent: i32,
    smart_volume: bool,
}

impl StandardBackend {
    /// Spawns both threads, building pipelines with `factory`.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::SpawnFailed` if either thread cannot start.
    pub fn new(
        factory: Arc<dyn PipelineFactory>,
        settings: &BackendSettings,
    ) -> Result<Self, BackendError> {
        let main = BackendThread::new(
            Arc::clone(&factory),
            settings.thread_config(MAIN_THREAD_NAME),
        )?;
        let preview = match BackendThread::new(factory, settings.thread_config(PREVIEW_THREAD_NAME))
        {
            Ok(preview) => preview,
            Err(e) => {
                main.shutdown();
                return Err(e);
            }
        };

        Ok(StandardBackend {
            main,
            preview,
            volume: Mutex::new(VolumeState {
                volume: settings.default_volume.clamp(MIN_VOLUME, MAX_VOLUME),
                muted: false,
                ducked: false,
            }),
            volume_step: settings.volume_step,
            smart_volume_percent: settings.smart_volume_percent,
            smart_volume: true,
        })
    }

    /// The thread playing the queue.
    #[must_use]
    pub fn main(&self) -> &BackendThread {
        &self.main
    }

    /// The thread playing previews.
    #[must_use]
    pub fn preview(&self) -> &BackendThread {
        &self.preview
    }

    /// Loads `path` on the main thread, restricted to a play window when
    /// `start` is non-negative.
    pub fn load_music<P: AsRef<Path>>(&self, path: P, start: i64, duration: i64) -> bool {
        load_with_section(&self.main, path.as_ref(), start, duration).is_ok()
    }

    /// Like [`StandardBackend::load_music`], but returns why loading failed.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the main thread could not build a pipeline.
    pub fn try_load_music<P: AsRef<Path>>(
        &self,
        path: P,
        start: i64,
        duration: i64,
    ) -> Result<(), BackendError> {
        load_with_section(&self.main, path.as_ref(), start, duration)
    }

    /// Loads `path` on the preview thread, restricted to a play window when
    /// `start` is non-negative.
    pub fn load_preview<P: AsRef<Path>>(&self, path: P, start: i64, duration: i64) -> bool {
        load_with_section(&self.preview, path.as_ref(), start, duration).is_ok()
    }

    pub fn play(&self) {
        self.main.play();
    }

    pub fn pause(&self) {
        self.main.pause();
    }

    /// Toggles the main thread between playing and paused.
    pub fn play_n_pause(&self) {
        if self.main.state() == PlayingState::Playing {
            self.main.pause();
        } else {
            self.main.play();
        }
    }

    pub fn stop(&self) {
        self.main.stop();
    }

    pub fn reset(&self) {
        self.main.reset();
    }

    /// Plays the preview, ducking the main thread when smart volume is on.
    pub fn play_preview(&self) {
        if self.smart_volume {
            let mut volume = self.volume.lock();
            if !volume.ducked {
                volume.ducked = true;
                self.apply(*volume);
            }
        }
        self.preview.play();
    }

    /// Stops the preview and brings the main thread back to full volume.
    pub fn stop_preview(&self) {
        self.preview.stop();
        self.restore_ducked();
    }

    /// Unloads the preview and brings the main thread back to full volume.
    pub fn reset_preview(&self) {
        self.preview.reset();
        self.restore_ducked();
    }

    /// Enables or disables ducking of the main thread during previews.
    pub fn set_smart_volume(&mut self, enabled: bool) {
        self.smart_volume = enabled;
        if !enabled {
            self.restore_ducked();
        }
    }

    /// Sets the shared volume, clamped to `0..=100`, and unmutes.
    pub fn set_volume(&self, volume: i32) {
        let mut state = self.volume.lock();
        state.volume = volume.clamp(MIN_VOLUME, MAX_VOLUME);
        state.muted = false;
        self.apply(*state);
    }

    /// Shared volume, `0..=100`, regardless of mute.
    #[must_use]
    pub fn volume(&self) -> i32 {
        self.volume.lock().volume
    }

    /// Raises the volume by the configured step.
    pub fn volume_up(&self) {
        let volume = self.volume();
        self.set_volume(volume.saturating_add(self.volume_step));
    }

    /// Lowers the volume by the configured step.
    pub fn volume_down(&self) {
        let volume = self.volume();
        self.set_volume(volume.saturating_sub(self.volume_step));
    }

    /// Mutes or unmutes both threads, keeping the volume for later.
    pub fn set_mute(&self, muted: bool) {
        let mut state = self.volume.lock();
        if state.muted == muted {
            return;
        }
        state.muted = muted;
        debug!(muted, "Mute state changed");
        self.apply(*state);
    }

    /// Flips the mute state.
    pub fn change_mute_state(&self) {
        let muted = self.mute();
        self.set_mute(!muted);
    }

    /// Whether output is muted.
    #[must_use]
    pub fn mute(&self) -> bool {
        self.volume.lock().muted
    }

    /// Saves the main thread's playback and releases its pipeline.
    pub fn save(&self) {
        self.main.save();
    }

    /// Restores the main thread's saved playback, optionally from a moved file.
    pub fn restore(&self, updated_path: Option<PathBuf>) {
        self.main.restore(updated_path);
    }

    /// Stops both threads.
    pub fn shutdown(&self) {
        self.preview.shutdown();
        self.main.shutdown();
    }

    fn restore_ducked(&self) {
        let mut volume = self.volume.lock();
        if volume.ducked {
            volume.ducked = false;
            self.apply(*volume);
        }
    }

    fn apply(&self, state: VolumeState) {
        let (main, preview) = if state.muted {
            (MIN_VOLUME, MIN_VOLUME)
        } else if state.ducked {
            (state.volume * self.smart_volume_percent / 100, state.volume)
        } else {
            (state.volume, state.volume)
        };
        self.main.set_volume(main);
        self.preview.set_volume(preview);
    }
}

impl Drop for StandardBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn load_with_section(
    thread: &BackendThread,
    path: &Path,
    start: i64,
    duration: i64,
) -> Result<(), BackendError> {
    thread.load(path)?;
    if start >= 0 {
        thread.set_play_section(start, duration);
    }
    Ok(())
}
