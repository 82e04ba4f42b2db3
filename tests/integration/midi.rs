//! MIDI integration tests
//!
//! Input forwarding through the session's bridge into the instrument, and the
//! unit MIDI output tap.

use unithost::prelude::*;
use unithost::{InputEvent, InputMessage, MidiListener, ScheduledEvent};

use crate::helpers::*;

#[test]
fn test_note_and_cc_forwarded_in_midi_session() {
    let (session, _tap) = test_session();
    let (unit, queue) = ProbeInstrument::handle();
    session.connect_handle(unit).unwrap();

    session.start_midi_playing().unwrap();
    let status = session.status().unwrap();
    assert_eq!(status.source, PlaybackSource::MidiInput);
    assert_eq!(status.scheduler, Some(SchedulerState::Idle));

    session.send_midi(&[0x91, 67, 100]).unwrap();
    session.send_midi(&[0x81, 67, 30]).unwrap();
    session.send_midi(&[0xB1, 7, 90]).unwrap();
    // Not forwarded: pitch bend, program change, aftertouch.
    session.send_midi(&[0xE1, 0x00, 0x40]).unwrap();
    session.send_midi(&[0xC1, 5]).unwrap();
    session.send_midi(&[0xD1, 20]).unwrap();

    assert!(wait_until(2000, || queue.pending() >= 3));
    assert_eq!(
        queue.drain(),
        vec![
            ScheduledEvent::note_on(67, 100),
            ScheduledEvent::note_off(67, 30),
            ScheduledEvent::control_change(7, 90),
        ]
    );
    assert_eq!(session.midi().received_count(), 6);
}

/// Zero-velocity note-on is a note-off on the wire.
#[test]
fn test_running_note_off_convention() {
    let (session, _tap) = test_session();
    let (unit, queue) = ProbeInstrument::handle();
    session.connect_handle(unit).unwrap();
    session.start_midi_playing().unwrap();

    session.send_midi(&[0x90, 60, 0]).unwrap();
    assert!(wait_until(2000, || queue.pending() >= 1));
    assert!(queue.drain()[0].is_note_off());
}

#[test]
fn test_input_ignored_when_not_playing() {
    let (session, _tap) = test_session();
    let (unit, queue) = ProbeInstrument::handle();
    session.connect_handle(unit).unwrap();

    session.send_midi(&[0x90, 60, 100]).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));
    assert_eq!(queue.pending(), 0);

    session.start_midi_playing().unwrap();
    session.stop_playing().unwrap();
    session.send_midi(&[0x90, 60, 100]).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));
    assert_eq!(queue.pending(), 0);
}

/// In effect mode there is no scheduler to forward to.
#[test]
fn test_input_ignored_in_effect_mode() {
    let (session, _tap) = test_session();
    assert!(session.toggle_midi_play().unwrap());

    let status = session.status().unwrap();
    assert_eq!(status.mode, PlaybackMode::Effect);
    assert!(!status.player_running);
    assert!(status.scheduler.is_none());
    session.send_midi(&[0x90, 60, 100]).unwrap();

    assert!(!session.toggle_midi_play().unwrap());
}

#[test]
fn test_malformed_input_is_rejected() {
    let (session, _tap) = test_session();
    let err = session.send_midi(&[]).unwrap_err();
    assert!(matches!(err, Error::Midi(_)));
    assert_eq!(session.midi().rejected_count(), 1);
}

/// Forwarding also works alongside the autonomous loop.
#[test]
fn test_forwarder_during_scale_loop() {
    let (session, _tap) = test_session();
    let (unit, queue) = ProbeInstrument::handle();
    session.connect_handle(unit).unwrap();
    session.start_playing().unwrap();

    let forwarder = session.controller().midi_forwarder();
    forwarder.on_midi(&InputMessage::new(
        3,
        InputEvent::ControlChange {
            controller: 64,
            value: 127,
        },
    ));
    assert!(wait_until(2000, || queue
        .drain()
        .contains(&ScheduledEvent::control_change(64, 127))));
    session.stop_playing().unwrap();
}

/// Events the instrument emits on its MIDI output are collected by the session.
#[test]
fn test_unit_midi_output_tap() {
    let (session, tap) = test_session();
    let factory = TestFactory::default();
    session
        .connect_unit(&factory, &UnitDescriptor::new("Keys", UnitKind::Instrument))
        .unwrap();
    assert!(session.drain_unit_midi_output().unwrap().is_empty());

    session.start_midi_playing().unwrap();
    session.send_midi(&[0x90, 72, 80]).unwrap();

    let mut echoed = Vec::new();
    assert!(wait_until(2000, || {
        tap.pull(TEST_BUFFER_SIZE);
        echoed.extend(session.drain_unit_midi_output().unwrap());
        !echoed.is_empty()
    }));
    assert_eq!(echoed, vec![ScheduledEvent::note_on(72, 80)]);

    session.reset().unwrap();
    assert!(session.drain_unit_midi_output().unwrap().is_empty());
}
