//! Behavioural tests for the playback thread against a scripted pipeline.

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Arc, time::Duration};

    use {
        async_channel::Receiver,
        tokio::time::{sleep, timeout},
    };

    use crate::{
        backend::{
            events::{BackendEvent, ErrorCategory, PlayingState},
            fake::FakeFactory,
            native::{NativeErrorKind, NativeMessage, NativeState},
            thread::{BackendThread, ThreadConfig},
        },
        error::NativeRuntimeError,
    };

    // Default timeout in milliseconds for test async operations
    const TEST_TIMEOUT_MS: u64 = 1000;

    const TRACK_MS: i64 = 60_000;

    fn spawn(factory: &FakeFactory) -> BackendThread {
        let config = ThreadConfig {
            name: "pipeplay-test".to_string(),
            tick_interval: Duration::from_millis(20),
            initial_volume: 80,
        };
        BackendThread::new(Arc::new(factory.clone()), config).unwrap()
    }

    async fn wait_for<F>(rx: &Receiver<BackendEvent>, predicate: F) -> BackendEvent
    where
        F: Fn(&BackendEvent) -> bool,
    {
        timeout(Duration::from_millis(TEST_TIMEOUT_MS), async {
            loop {
                let event = rx.recv().await.unwrap();
                if predicate(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for backend event")
    }

    async fn wait_for_state(rx: &Receiver<BackendEvent>, state: PlayingState) {
        wait_for(rx, |event| *event == BackendEvent::StateChanged(state)).await;
    }

    async fn wait_for_duration(rx: &Receiver<BackendEvent>) -> i64 {
        match wait_for(rx, |event| matches!(event, BackendEvent::DurationChanged(_))).await {
            BackendEvent::DurationChanged(duration) => duration,
            _ => unreachable!(),
        }
    }

    async fn wait_for_position(rx: &Receiver<BackendEvent>) -> i64 {
        match wait_for(rx, |event| matches!(event, BackendEvent::PositionChanged(_))).await {
            BackendEvent::PositionChanged(position) => position,
            _ => unreachable!(),
        }
    }

    /// Loads a track and waits until its duration is known.
    async fn loaded(factory: &FakeFactory) -> (BackendThread, Receiver<BackendEvent>) {
        let thread = spawn(factory);
        let rx = thread.subscribe();
        assert!(thread.load_file("/music/track.flac"));
        wait_for_duration(&rx).await;
        (thread, rx)
    }

    #[tokio::test]
    async fn test_subscribe_reports_current_state() {
        let thread = spawn(&FakeFactory::default());
        let rx = thread.subscribe();
        assert_eq!(
            rx.recv().await.unwrap(),
            BackendEvent::StateChanged(PlayingState::Idle)
        );
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_load_is_never_playing() {
        let factory = FakeFactory::with_duration(TRACK_MS);
        let thread = spawn(&factory);
        assert!(thread.load_file("/music/track.flac"));
        assert!(matches!(
            thread.state(),
            PlayingState::Loading | PlayingState::Stopped
        ));
        assert_eq!(thread.position(), 0);
        assert_eq!(
            thread.file_path(),
            Some(PathBuf::from("/music/track.flac"))
        );
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_load_failure_reports_construction_error() {
        let factory = FakeFactory::default();
        factory
            .script
            .lock()
            .broken_paths
            .insert(PathBuf::from("/music/broken.ogg"));
        let thread = spawn(&factory);
        let rx = thread.subscribe();

        assert!(!thread.load_file("/music/broken.ogg"));
        assert_eq!(thread.state(), PlayingState::Error);
        let event = wait_for(&rx, |event| matches!(event, BackendEvent::Error { .. })).await;
        assert!(matches!(
            event,
            BackendEvent::Error {
                category: ErrorCategory::Construction,
                ..
            }
        ));

        // Only a new load or a reset leaves the error state.
        thread.play();
        thread.reset();
        wait_for_state(&rx, PlayingState::Idle).await;
        assert_eq!(thread.state(), PlayingState::Idle);
        assert!(thread.file_path().is_none());
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_reload_rebuilds_pipeline() {
        let factory = FakeFactory::with_duration(TRACK_MS);
        let thread = spawn(&factory);
        assert!(thread.load_file("/music/a.flac"));
        assert!(thread.load_file("/music/b.flac"));
        assert_eq!(factory.script.lock().builds, 2);
        assert_eq!(thread.file_path(), Some(PathBuf::from("/music/b.flac")));
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_volume_is_clamped() {
        let factory = FakeFactory::with_duration(TRACK_MS);
        let (thread, rx) = loaded(&factory).await;

        thread.set_volume(150);
        assert_eq!(thread.volume(), 100);
        wait_for(&rx, |event| *event == BackendEvent::VolumeChanged(100)).await;
        assert_eq!(factory.script.lock().volume, 1.0);

        thread.set_volume(-5);
        assert_eq!(thread.volume(), 0);
        wait_for(&rx, |event| *event == BackendEvent::VolumeChanged(0)).await;
        assert_eq!(factory.script.lock().volume, 0.0);
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_initial_volume_applied_on_load() {
        let factory = FakeFactory::with_duration(TRACK_MS);
        let (thread, _rx) = loaded(&factory).await;
        assert_eq!(thread.volume(), 80);
        assert!((factory.script.lock().volume - 0.8).abs() < f64::EPSILON);
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_set_position_is_clamped() {
        let factory = FakeFactory::with_duration(TRACK_MS);
        let (thread, rx) = loaded(&factory).await;
        assert_eq!(thread.duration(), TRACK_MS);

        thread.set_position(90_000);
        assert_eq!(wait_for_position(&rx).await, TRACK_MS);
        assert_eq!(thread.position(), TRACK_MS);

        thread.set_position(-10);
        assert_eq!(wait_for_position(&rx).await, 0);
        assert_eq!(thread.position(), 0);
        assert_eq!(factory.seeks(), vec![TRACK_MS, 0]);
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_duration_from_clock_when_not_announced() {
        let factory = FakeFactory::default();
        factory.script.lock().duration_ms = Some(TRACK_MS);
        let thread = spawn(&factory);
        let rx = thread.subscribe();
        assert!(thread.load_file("/music/track.mp3"));
        assert_eq!(wait_for_duration(&rx).await, TRACK_MS);
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_section_limits_duration() {
        let factory = FakeFactory::with_duration(TRACK_MS);
        let (thread, rx) = loaded(&factory).await;

        thread.set_play_section(10_000, 5_000);
        assert!(thread.has_section());
        assert_eq!(thread.duration(), 5_000);
        assert_eq!(wait_for_duration(&rx).await, 5_000);

        thread.set_play_section(50_000, 20_000);
        assert_eq!(thread.duration(), 10_000);
        assert!(thread.position() <= thread.duration());

        thread.set_play_section(-1, -1);
        assert!(!thread.has_section());
        assert_eq!(thread.duration(), TRACK_MS);
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_section_set_before_duration_is_revalidated() {
        let factory = FakeFactory::default();
        factory.script.lock().duration_ms = Some(TRACK_MS);
        let thread = spawn(&factory);
        let rx = thread.subscribe();
        assert!(thread.load_file("/music/track.flac"));
        thread.set_play_section(55_000, 20_000);

        wait_for(&rx, |event| *event == BackendEvent::DurationChanged(5_000)).await;
        assert_eq!(thread.duration(), 5_000);
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_section_translates_seeks() {
        let factory = FakeFactory::with_duration(TRACK_MS);
        let (thread, rx) = loaded(&factory).await;

        thread.set_play_section(10_000, 5_000);
        // Moving the window while stopped parks the pipeline at its start.
        assert_eq!(wait_for_position(&rx).await, 0);
        thread.set_position(1_000);
        assert_eq!(wait_for_position(&rx).await, 1_000);
        thread.set_position(8_000);
        assert_eq!(wait_for_position(&rx).await, 5_000);
        assert_eq!(factory.seeks(), vec![10_000, 11_000, 15_000]);
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_play_is_confirmed_and_ticks() {
        let factory = FakeFactory::with_duration(TRACK_MS);
        let (thread, rx) = loaded(&factory).await;

        thread.play();
        wait_for_state(&rx, PlayingState::Playing).await;
        assert_eq!(
            factory.script.lock().requested_states.last(),
            Some(&NativeState::Playing)
        );

        factory.set_position(3_000);
        wait_for(&rx, |event| *event == BackendEvent::PositionChanged(3_000)).await;
        assert_eq!(thread.position(), 3_000);

        thread.pause();
        wait_for_state(&rx, PlayingState::Paused).await;
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_stop_rewinds_to_section_start() {
        let factory = FakeFactory::with_duration(TRACK_MS);
        let (thread, rx) = loaded(&factory).await;
        thread.set_play_section(20_000, 10_000);
        thread.play();
        wait_for_state(&rx, PlayingState::Playing).await;

        factory.set_position(24_000);
        wait_for(&rx, |event| *event == BackendEvent::PositionChanged(4_000)).await;

        thread.stop();
        wait_for_state(&rx, PlayingState::Stopped).await;
        assert_eq!(thread.position(), 0);
        assert_eq!(factory.seeks().last(), Some(&20_000));
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_end_of_stream_finishes() {
        let factory = FakeFactory::with_duration(TRACK_MS);
        let (thread, rx) = loaded(&factory).await;
        thread.play();
        wait_for_state(&rx, PlayingState::Playing).await;

        factory.set_position(TRACK_MS);
        factory.end_of_stream();
        wait_for(&rx, |event| *event == BackendEvent::Finished).await;
        wait_for_state(&rx, PlayingState::Stopped).await;
        assert_eq!(thread.position(), 0);
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_end_of_stream_before_seek_is_ignored() {
        let factory = FakeFactory::with_duration(TRACK_MS);
        let (thread, rx) = loaded(&factory).await;
        thread.play();
        wait_for_state(&rx, PlayingState::Playing).await;

        let flushed = factory.seqnum();
        thread.set_position(30_000);
        wait_for(&rx, |event| *event == BackendEvent::PositionChanged(30_000)).await;
        assert_ne!(factory.seqnum(), flushed);

        // Posted by the flow the seek flushed.
        factory.post(NativeMessage::EndOfStream { seqnum: flushed });
        sleep(Duration::from_millis(100)).await;
        while let Ok(event) = rx.try_recv() {
            assert_ne!(event, BackendEvent::Finished);
        }
        assert_eq!(thread.state(), PlayingState::Playing);
        assert_eq!(thread.position(), 30_000);
        assert_eq!(factory.seeks(), vec![30_000]);

        factory.end_of_stream();
        wait_for(&rx, |event| *event == BackendEvent::Finished).await;
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_section_end_finishes() {
        let factory = FakeFactory::with_duration(TRACK_MS);
        let (thread, rx) = loaded(&factory).await;
        thread.set_play_section(5_000, 2_000);
        thread.play();
        wait_for_state(&rx, PlayingState::Playing).await;

        factory.set_position(7_500);
        wait_for(&rx, |event| *event == BackendEvent::Finished).await;
        wait_for_state(&rx, PlayingState::Stopped).await;
        assert_eq!(factory.seeks().last(), Some(&5_000));
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_runtime_error_forces_idle() {
        let factory = FakeFactory::with_duration(TRACK_MS);
        let (thread, rx) = loaded(&factory).await;
        thread.play();
        wait_for_state(&rx, PlayingState::Playing).await;

        factory.fail(NativeRuntimeError::new(NativeErrorKind::Decode, "corrupt frame"));
        let event = wait_for(&rx, |event| matches!(event, BackendEvent::Error { .. })).await;
        assert_eq!(
            event,
            BackendEvent::Error {
                category: ErrorCategory::Decode,
                message: "corrupt frame".to_string(),
            }
        );
        wait_for_state(&rx, PlayingState::Idle).await;
        assert!(thread.file_path().is_none());
        assert_eq!(
            factory.script.lock().requested_states.last(),
            Some(&NativeState::Null)
        );
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_reset_from_playing() {
        let factory = FakeFactory::with_duration(TRACK_MS);
        let (thread, rx) = loaded(&factory).await;
        thread.play();
        wait_for_state(&rx, PlayingState::Playing).await;

        thread.reset();
        wait_for_state(&rx, PlayingState::Idle).await;
        assert_eq!(thread.position(), 0);
        assert_eq!(thread.duration(), 0);
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_save_without_file_is_noop() {
        let factory = FakeFactory::default();
        let thread = spawn(&factory);
        let rx = thread.subscribe();
        assert_eq!(
            rx.recv().await.unwrap(),
            BackendEvent::StateChanged(PlayingState::Idle)
        );

        thread.save();
        thread.restore(None);
        sleep(Duration::from_millis(100)).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(thread.state(), PlayingState::Idle);
        assert_eq!(factory.script.lock().builds, 0);
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_save_and_restore_resumes_playback() {
        let factory = FakeFactory::with_duration(TRACK_MS);
        let (thread, rx) = loaded(&factory).await;
        thread.play();
        wait_for_state(&rx, PlayingState::Playing).await;
        factory.set_position(12_000);
        wait_for(&rx, |event| *event == BackendEvent::PositionChanged(12_000)).await;

        thread.save();
        wait_for_state(&rx, PlayingState::Idle).await;

        thread.restore(Some(PathBuf::from("/music/moved.flac")));
        wait_for_state(&rx, PlayingState::Playing).await;
        assert_eq!(thread.file_path(), Some(PathBuf::from("/music/moved.flac")));
        assert_eq!(factory.seeks().last(), Some(&12_000));
        assert_eq!(factory.script.lock().builds, 2);

        // The snapshot is consumed.
        thread.reset();
        wait_for_state(&rx, PlayingState::Idle).await;
        thread.restore(None);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(thread.state(), PlayingState::Idle);
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_restore_reports_section_duration() {
        let factory = FakeFactory::with_duration(TRACK_MS);
        let (thread, rx) = loaded(&factory).await;
        thread.set_play_section(10_000, 5_000);
        wait_for(&rx, |event| *event == BackendEvent::DurationChanged(5_000)).await;

        thread.save();
        wait_for_state(&rx, PlayingState::Idle).await;
        assert_eq!(thread.duration(), 0);

        thread.restore(None);
        wait_for(&rx, |event| *event == BackendEvent::Loaded).await;
        wait_for(&rx, |event| *event == BackendEvent::DurationChanged(5_000)).await;
        assert!(thread.has_section());
        assert_eq!(thread.duration(), 5_000);
        thread.shutdown();
    }

    #[tokio::test]
    async fn test_section_queued_after_restore_wins() {
        let factory = FakeFactory::with_duration(TRACK_MS);
        let (thread, rx) = loaded(&factory).await;
        thread.save();
        wait_for_state(&rx, PlayingState::Idle).await;

        thread.restore(None);
        thread.set_play_section(1_000, 2_000);
        assert!(thread.has_section());

        wait_for(&rx, |event| *event == BackendEvent::Loaded).await;
        wait_for(&rx, |event| *event == BackendEvent::DurationChanged(2_000)).await;
        sleep(Duration::from_millis(50)).await;
        assert!(thread.has_section());
        assert_eq!(thread.duration(), 2_000);
        thread.shutdown();
    }
}
