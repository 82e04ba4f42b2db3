//! Unit replacement integration tests
//!
//! Wiring per mode, pause/resume around `connect`, idempotent reset, render
//! resource release, and the re-entrancy boundary of completions.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use unithost::core;
use unithost::prelude::*;
use unithost::{MixerBus, NodeRole, UnitHandle, Wire};

use crate::helpers::tolerances::*;
use crate::helpers::*;

fn pass_through() -> Vec<Wire> {
    let mut wires = vec![
        Wire::new(NodeRole::Player, NodeRole::MainMixer, MixerBus::Playback.index()),
        Wire::new(NodeRole::MainMixer, NodeRole::Output, 0),
    ];
    wires.sort_by_key(|w| (w.destination.to_string(), w.bus, w.source.to_string()));
    wires
}

fn effect() -> UnitDescriptor {
    UnitDescriptor::new("Half Gain", UnitKind::Effect).with_manufacturer("test")
}

fn instrument() -> UnitDescriptor {
    UnitDescriptor::new("Keys", UnitKind::Instrument).with_manufacturer("test")
}

#[test]
fn test_effect_wiring_and_signal() {
    let (session, tap) = test_session();
    let factory = TestFactory::default();

    let status = session.connect_unit(&factory, &effect()).unwrap();
    assert_eq!(status.mode, PlaybackMode::Effect);
    assert_eq!(status.active_unit.as_deref(), Some("Half Gain"));
    let effect_node = NodeRole::Unit(UnitKind::Effect);
    assert!(status
        .wiring
        .contains(&Wire::new(NodeRole::Player, effect_node, 0)));
    assert!(status.wiring.contains(&Wire::new(
        effect_node,
        NodeRole::MainMixer,
        MixerBus::Playback.index()
    )));
    assert!(!status
        .wiring
        .contains(&Wire::new(NodeRole::Player, NodeRole::MainMixer, 0)));

    session.start_playing().unwrap();
    assert_level(&tap.pull(TEST_BUFFER_SIZE), ASSET_LEVEL * 0.5, FLOAT_EPSILON);
}

#[test]
fn test_instrument_wiring_skips_player() {
    let (session, _tap) = test_session();
    let factory = TestFactory::default();

    let status = session.connect_unit(&factory, &instrument()).unwrap();
    assert_eq!(status.mode, PlaybackMode::Instrument);
    assert!(status.wiring.contains(&Wire::new(
        NodeRole::Unit(UnitKind::Instrument),
        NodeRole::MainMixer,
        MixerBus::Instrument.index()
    )));
    assert!(status.wiring.contains(&Wire::new(
        NodeRole::MainMixer,
        NodeRole::Output,
        0
    )));
    assert!(!status.wiring.iter().any(|w| w.source == NodeRole::Player));
}

#[test]
fn test_reset_twice_is_pass_through() {
    let (session, tap) = test_session();
    let factory = TestFactory::default();
    session.connect_unit(&factory, &effect()).unwrap();

    session.reset().unwrap();
    session.reset().unwrap();

    let status = session.status().unwrap();
    assert_eq!(status.active_unit, None);
    assert_eq!(status.wiring, pass_through());
    assert_eq!(factory.probe.allocated(), 0);

    session.start_playing().unwrap();
    assert_level(&tap.pull(TEST_BUFFER_SIZE), ASSET_LEVEL, FLOAT_EPSILON);
}

/// Replacing a unit releases the old one's render resources.
#[test]
fn test_replaced_unit_is_deallocated() {
    let (session, tap) = test_session();
    let factory = TestFactory::default();
    session.start_playing().unwrap();

    session.connect_unit(&factory, &effect()).unwrap();
    tap.pull(TEST_BUFFER_SIZE);
    assert_eq!(factory.probe.allocated(), 1);

    session.connect_unit(&factory, &instrument()).unwrap();
    tap.pull(TEST_BUFFER_SIZE);
    assert_eq!(factory.probe.allocated(), 1);

    session.reset().unwrap();
    tap.pull(TEST_BUFFER_SIZE);
    assert_eq!(factory.probe.allocated(), 0);
}

#[test]
fn test_failed_allocation_leaves_pass_through() {
    let (session, _tap) = test_session();
    let factory = TestFactory {
        fail_allocation: true,
        ..Default::default()
    };

    let err = session.connect_unit(&factory, &effect()).unwrap_err();
    assert!(matches!(
        err,
        Error::Core(core::Error::ResourceAllocation { .. })
    ));
    let status = session.status().unwrap();
    assert_eq!(status.active_unit, None);
    assert_eq!(status.wiring, pass_through());
}

/// An allocated unit that cannot render a full graph block is refused.
#[test]
fn test_undersized_unit_is_refused() {
    let (session, _tap) = test_session();
    let probe = UnitProbe::default();
    let unit = GainEffect::new("Tiny", 1.0, probe.clone()).fixed_max_frames(64);
    let mut handle = UnitHandle::new(Box::new(unit), UnitKind::Effect).unwrap();
    handle.allocate_render_resources().unwrap();

    let err = session.connect_handle(handle).unwrap_err();
    assert!(matches!(err, Error::Core(core::Error::InvalidConfig(_))));
    assert_eq!(probe.allocated(), 0);
    assert_eq!(session.status().unwrap().wiring, pass_through());
}

/// Swapping an instrument in while playing moves sound production to the note
/// scheduler; swapping an effect back hands it to the file player. The two
/// are never active together.
#[test]
fn test_mode_switch_while_playing() {
    let (session, tap) = test_session();
    let factory = TestFactory::default();
    session.start_playing().unwrap();

    session.connect_unit(&factory, &instrument()).unwrap();
    let status = session.status().unwrap();
    assert!(status.is_playing);
    assert_eq!(status.mode, PlaybackMode::Instrument);
    assert!(!status.player_running);
    assert!(status.scheduler.is_some());
    assert!(wait_until(2000, || peak(&tap.pull(TEST_BUFFER_SIZE)) > 0.0));

    session.connect_unit(&factory, &effect()).unwrap();
    let status = session.status().unwrap();
    assert!(status.is_playing);
    assert_eq!(status.mode, PlaybackMode::Effect);
    assert!(status.player_running);
    assert!(status.scheduler.is_none());
    assert!(session.current_scheduler().is_none());
    assert_level(&tap.pull(TEST_BUFFER_SIZE), ASSET_LEVEL * 0.5, FLOAT_EPSILON);
}

/// While stopped, connecting changes wiring but starts nothing.
#[test]
fn test_connect_while_stopped_stays_stopped() {
    let (session, _tap) = test_session();
    let factory = TestFactory::default();

    let status = session.connect_unit(&factory, &instrument()).unwrap();
    assert!(!status.is_playing);
    assert!(status.scheduler.is_none());
    assert!(!status.player_running);
    assert!(!status.engine_running);
}

#[test]
fn test_completion_sees_new_wiring() {
    let (session, _tap) = test_session();
    let (unit, _queue) = ProbeInstrument::handle();
    let (called, completion) = completion_flag();

    session.controller().connect(Some(unit), completion).unwrap();
    assert!(called.load(Ordering::SeqCst));
    assert_eq!(
        session.status().unwrap().active_unit.as_deref(),
        Some("probe")
    );
}

/// Calling back into the controller from a completion is refused instead of
/// deadlocking the serialization thread.
#[test]
fn test_reentrant_completion_is_refused() {
    let (session, _tap) = test_session();
    let session = Arc::new(session);
    let inner = Arc::clone(&session);
    let outcome = Arc::new(std::sync::Mutex::new(None));
    let slot = Arc::clone(&outcome);

    session
        .controller()
        .connect(None, move |_| {
            *slot.lock().unwrap() = Some(inner.reset());
        })
        .unwrap();

    let result = outcome.lock().unwrap().take().unwrap();
    assert!(matches!(
        result,
        Err(Error::Core(core::Error::Reentrant {
            operation: "connect"
        }))
    ));
    // The controller is still serving calls.
    session.start_playing().unwrap();
    assert!(session.is_playing());
}
