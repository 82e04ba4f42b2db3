//! Integration test modules for unithost
//!
//! - session: lifecycle, configuration, asset loading, engine failures
//! - rewiring: connect/reset, wiring per mode, resource release, re-entrancy
//! - scheduler: instrument playback through the note loop
//! - midi: input forwarding and unit MIDI output

pub mod midi;
pub mod rewiring;
pub mod scheduler;
pub mod session;
