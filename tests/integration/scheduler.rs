//! Instrument playback integration tests
//!
//! The note loop as seen from a hosted instrument: event order, the closing
//! silence event, one loop per session, and audio produced by held notes.

use unithost::prelude::*;
use unithost::ScheduledEvent;

use crate::helpers::*;

#[test]
fn test_loop_event_sequence() {
    let (session, _tap) = test_session();
    let (unit, queue) = ProbeInstrument::handle();
    session.connect_handle(unit).unwrap();

    session.start_playing().unwrap();
    let scheduler = session.current_scheduler().unwrap();
    assert!(wait_until(2000, || scheduler.note_offset() >= 14));
    session.stop_playing().unwrap();

    assert!(scheduler.is_done());
    assert_eq!(scheduler.state(), SchedulerState::Idle);
    assert!(session.current_scheduler().is_none());

    let events = queue.drain();
    assert_eq!(events[0], ScheduledEvent::silence());
    assert_eq!(events.last(), Some(&ScheduledEvent::silence()));
    assert_eq!(events.iter().filter(|e| e.is_silence()).count(), 2);

    // C major upwards from middle C.
    let notes: Vec<u8> = events
        .iter()
        .filter(|e| e.is_note_on())
        .map(|e| e.data1)
        .take(8)
        .collect();
    assert_eq!(notes, vec![60, 62, 64, 65, 67, 69, 71, 72]);

    // Each note-on is closed before the next one opens.
    let body = &events[1..events.len() - 1];
    for pair in body.chunks(2) {
        assert!(pair[0].is_note_on());
        assert_eq!(pair[1], ScheduledEvent::note_off(pair[0].data1, 0));
    }
}

#[test]
fn test_start_twice_keeps_one_scheduler() {
    let (session, _tap) = test_session();
    let (unit, queue) = ProbeInstrument::handle();
    session.connect_handle(unit).unwrap();

    session.start_playing().unwrap();
    let first = session.current_scheduler().unwrap();
    session.start_playing().unwrap();
    let second = session.current_scheduler().unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));

    session.stop_playing().unwrap();
    assert_eq!(first.runs_completed(), 1);
    let silences = queue.drain().iter().filter(|e| e.is_silence()).count();
    assert_eq!(silences, 2);
}

/// Each session gets a fresh scheduler; a stopped one is never reused.
#[test]
fn test_restart_uses_new_scheduler() {
    let (session, _tap) = test_session();
    let (unit, _queue) = ProbeInstrument::handle();
    session.connect_handle(unit).unwrap();

    session.start_playing().unwrap();
    let first = session.current_scheduler().unwrap();
    session.stop_playing().unwrap();

    session.start_playing().unwrap();
    let second = session.current_scheduler().unwrap();
    assert!(!std::sync::Arc::ptr_eq(&first, &second));
    assert!(first.is_done());
    assert!(!second.is_done());
    session.stop_playing().unwrap();
}

#[test]
fn test_held_notes_reach_the_output() {
    let (session, tap) = test_session();
    let factory = TestFactory::default();
    session
        .connect_unit(&factory, &UnitDescriptor::new("Keys", UnitKind::Instrument))
        .unwrap();

    session.start_playing().unwrap();
    assert!(wait_until(2000, || {
        (peak(&tap.pull(TEST_BUFFER_SIZE)) - NOTE_LEVEL).abs() < 1e-6
    }));
    session.stop_playing().unwrap();
    assert_eq!(peak(&tap.pull(TEST_BUFFER_SIZE)), 0.0);
}

#[test]
fn test_release_time_grows_while_looping() {
    let (session, _tap) = test_session();
    let (unit, _queue) = ProbeInstrument::handle();
    session.connect_handle(unit).unwrap();

    session.start_playing().unwrap();
    let scheduler = session.current_scheduler().unwrap();
    let initial = scheduler.config().initial_release;
    assert!(wait_until(2000, || scheduler.release_time() > initial * 1.1));
    session.stop_playing().unwrap();

    let release = scheduler.release_time();
    assert!(release > initial);
    assert!(release <= scheduler.config().release_ceiling);
}

/// A long note is cut short by stop; the loop still closes it and drains.
#[test]
fn test_stop_during_long_note_drains() {
    let driver = OfflineDriver::new(AudioFormat::new(TEST_SAMPLE_RATE, 2));
    let session = HostSession::builder()
        .driver(Box::new(driver))
        .asset(dc_asset(64, 0.1))
        .scheduler(SchedulerConfig {
            note_length: std::time::Duration::from_secs(60),
            ..fast_scheduler()
        })
        .build()
        .unwrap();
    let (unit, queue) = ProbeInstrument::handle();
    session.connect_handle(unit).unwrap();

    session.start_playing().unwrap();
    assert!(wait_until(2000, || queue.pending() >= 2));
    let started = std::time::Instant::now();
    session.stop_playing().unwrap();
    assert!(started.elapsed() < std::time::Duration::from_secs(10));

    assert_eq!(
        queue.drain(),
        vec![
            ScheduledEvent::silence(),
            ScheduledEvent::note_on(60, 64),
            ScheduledEvent::note_off(60, 0),
            ScheduledEvent::silence(),
        ]
    );
}
