//! MIDI plumbing for hosted units.
//!
//! - [`ScheduledEvent`]: fixed 3-byte event delivered to an instrument unit
//! - [`event_channel`]: bounded, pre-allocated event slots ([`EventInjector`] / [`EventQueue`])
//! - [`InputMessage`]: typed MIDI input with channel and optional timestamp
//! - [`MidiInputBridge`]: session-owned fan-out of device input to [`MidiListener`]s
//!
//! Hardware input via `midir` is behind the `midi-io` feature.

pub mod error;
pub use error::{Error, Result};

mod event;
pub use event::{status, EventTiming, ScheduledEvent, SILENCE_CONTROLLER};

mod injector;
pub use injector::{event_channel, EventInjector, EventQueue, DEFAULT_EVENT_CAPACITY};

mod input;
pub use input::{InputEvent, InputMessage};

mod bridge;
pub use bridge::{ListenerId, MidiInputBridge, MidiListener};
