//! Session lifecycle integration tests
//!
//! Building, starting, stopping and tearing down a session; asset loading and
//! the typed errors that replace process aborts.

use std::sync::atomic::Ordering;

use unithost::core;
use unithost::prelude::*;

use crate::helpers::tolerances::*;
use crate::helpers::*;

#[test]
fn test_session_starts_idle() {
    let (session, tap) = test_session();
    let status = session.status().unwrap();

    assert!(!status.is_playing);
    assert_eq!(status.mode, PlaybackMode::Effect);
    assert_eq!(status.active_unit, None);
    assert!(!status.engine_running);
    assert!(!tap.is_running());
    assert_silence(&tap.pull(TEST_BUFFER_SIZE), SILENCE_THRESHOLD);
}

/// The asset keeps looping: each finished segment is re-queued behind the
/// one still playing.
#[test]
fn test_effect_playback_loops_asset() {
    let (session, tap) = test_session();
    session.start_playing().unwrap();

    // Three passes over a 1024-frame asset.
    for _ in 0..3 {
        for _ in 0..4 {
            assert_level(&tap.pull(TEST_BUFFER_SIZE), ASSET_LEVEL, FLOAT_EPSILON);
        }
        assert!(wait_until(2000, || session
            .status()
            .unwrap()
            .pending_segments
            == 2));
    }
}

#[test]
fn test_start_twice_keeps_one_loop() {
    let (session, _tap) = test_session();
    session.start_playing().unwrap();
    session.start_playing().unwrap();

    let status = session.status().unwrap();
    assert!(status.is_playing);
    assert!(status.player_running);
    assert_eq!(status.pending_segments, 2);
}

#[test]
fn test_stop_is_idempotent() {
    let (session, tap) = test_session();
    session.stop_playing().unwrap();

    session.start_playing().unwrap();
    session.stop_playing().unwrap();
    session.stop_playing().unwrap();

    let status = session.status().unwrap();
    assert!(!status.is_playing);
    assert!(!status.player_running);
    assert!(!status.engine_running);
    assert_eq!(status.pending_segments, 0);
    assert_silence(&tap.pull(TEST_BUFFER_SIZE), SILENCE_THRESHOLD);
}

#[test]
fn test_toggle_play() {
    let (session, _tap) = test_session();
    assert!(session.toggle_play().unwrap());
    assert!(session.is_playing());
    assert!(!session.toggle_play().unwrap());
    assert!(!session.is_playing());
}

/// A mono 16-bit fixture is decoded and widened to the stereo graph.
#[test]
fn test_asset_loaded_from_wav() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("loop.wav");
    write_wav(&path, &[16384; 512], 1);

    let driver = OfflineDriver::new(AudioFormat::new(TEST_SAMPLE_RATE, 2));
    let tap = driver.tap();
    let session = HostSession::builder()
        .max_frames(TEST_BUFFER_SIZE)
        .asset_path(&path)
        .driver(Box::new(driver))
        .build()
        .unwrap();

    session.start_playing().unwrap();
    assert_level(&tap.pull(TEST_BUFFER_SIZE), 0.5, INT16_EPSILON);
}

#[test]
fn test_missing_asset_is_typed_error() {
    let result = HostSession::builder()
        .asset_path("does/not/exist.wav")
        .driver(Box::new(OfflineDriver::new(AudioFormat::new(
            TEST_SAMPLE_RATE,
            2,
        ))))
        .build();

    assert!(matches!(
        result,
        Err(Error::Core(core::Error::AssetNotFound(_)))
    ));
}

#[test]
fn test_invalid_config_rejected() {
    let result = HostSession::builder()
        .channels(0)
        .asset(dc_asset(64, 0.1))
        .build();
    assert!(matches!(
        result,
        Err(Error::Core(core::Error::InvalidConfig(_)))
    ));

    let result = HostSession::builder()
        .scheduler(SchedulerConfig {
            steps: vec![2, 0, 1],
            ..Default::default()
        })
        .asset(dc_asset(64, 0.1))
        .build();
    assert!(matches!(
        result,
        Err(Error::Core(core::Error::InvalidConfig(_)))
    ));
}

/// A render engine that cannot start is reported, not fatal, and leaves the
/// session stopped.
#[test]
fn test_engine_start_failure_is_reported() {
    let driver = FailingDriver::default();
    let attempts = driver.attempts.clone();
    let session = HostSession::builder()
        .driver(Box::new(driver))
        .asset(dc_asset(64, 0.1))
        .build()
        .unwrap();

    let err = session.start_playing().unwrap_err();
    assert!(matches!(err, Error::Core(core::Error::EngineStart(_))));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    let status = session.status().unwrap();
    assert!(!status.is_playing);
    assert!(!status.player_running);
    assert_eq!(status.pending_segments, 0);

    assert!(matches!(
        session.start_midi_playing(),
        Err(Error::Core(core::Error::EngineStart(_)))
    ));
    assert!(!session.is_playing());
}

#[test]
fn test_dropping_session_detaches_forwarder() {
    let (session, _tap) = test_session();
    let bridge = session.midi().clone();
    assert_eq!(bridge.listener_count(), 1);

    session.start_playing().unwrap();
    drop(session);
    assert_eq!(bridge.listener_count(), 0);
}

#[test]
fn test_thread_driver_renders_in_background() {
    let format = AudioFormat::new(TEST_SAMPLE_RATE, 2);
    let (driver, mut capture) = ThreadDriver::new(format, TEST_BUFFER_SIZE).with_capture(8192);
    let session = HostSession::builder()
        .max_frames(TEST_BUFFER_SIZE)
        .driver(Box::new(driver))
        .asset(dc_asset(4096, ASSET_LEVEL))
        .build()
        .unwrap();

    session.start_playing().unwrap();
    assert!(wait_until(2000, || capture.available_frames() >= 1024));
    session.stop_playing().unwrap();

    let captured = capture.read_available();
    assert!(captured.len() >= 1024 * 2);
    assert!(captured
        .iter()
        .any(|s| (s - ASSET_LEVEL).abs() <= FLOAT_EPSILON));
}
