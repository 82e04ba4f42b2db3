//! # unithost - hosting processing units in a live audio graph
//!
//! ## Architecture
//!
//! unithost is an umbrella crate over two subsystems:
//! - **unithost-core** - audio graph, file player, hosted-unit boundary, output
//!   drivers, the serialized `GraphController` and the `NoteScheduler`
//! - **unithost-midi** - 3-byte event wire type, bounded event channels, typed
//!   MIDI input and the session-owned input bridge
//!
//! ## Quick Start
//!
//! ```ignore
//! use unithost::prelude::*;
//!
//! let session = HostSession::builder()
//!     .sample_rate(44100.0)
//!     .asset_path("assets/Synth.wav")
//!     .build()?;
//!
//! // Loop the asset through the graph
//! session.start_playing()?;
//!
//! // Swap in an instrument; playback resumes with the note scheduler
//! session.connect_unit(&factory, &UnitDescriptor::new("Keys", UnitKind::Instrument))?;
//! ```
//!
//! ## Feature Flags
//!
//! - `cpal` - hardware audio output
//! - `midi-io` - hardware MIDI input
//! - `full` - both

/// Re-export of unithost-core for direct access
pub use unithost_core as core;

/// Re-export of unithost-midi for direct access
pub use unithost_midi as midi;

pub use unithost_core::{
    // Lock-free primitives
    AtomicDouble,
    AtomicFlag,
    AtomicFloat,

    // Graph
    AudioBuffer,
    AudioFile,
    AudioFormat,
    AudioGraph,
    GraphRenderer,
    MixerBus,
    MixerControl,
    NodeId,
    NodeRole,
    Wire,

    // Units
    HostedUnit,
    UnitDescriptor,
    UnitFactory,
    UnitHandle,
    UnitKind,

    // Drivers
    CaptureReader,
    OfflineDriver,
    OfflineTap,
    OutputDriver,
    ThreadDriver,

    // Controller and scheduler
    DrainStatus,
    GraphController,
    MidiForwarder,
    NoteSchedule,
    NoteScheduler,
    PlaybackMode,
    PlaybackSource,
    SchedulerState,
    SessionStatus,

    // Configuration
    HostConfig,
    SchedulerConfig,
};

#[cfg(feature = "cpal")]
pub use unithost_core::CpalDriver;

pub use unithost_midi::{
    event_channel, EventInjector, EventQueue, InputEvent, InputMessage, MidiInputBridge,
    MidiListener, ScheduledEvent,
};

pub mod error;
pub use error::{Error, Result};

mod builder;
mod session;

pub use builder::HostSessionBuilder;
pub use session::HostSession;

/// Convenience prelude for common imports
pub mod prelude {
    // Session
    pub use crate::{HostSession, HostSessionBuilder};

    // Configuration
    pub use crate::{HostConfig, SchedulerConfig};

    // Units
    pub use crate::{AudioBuffer, AudioFormat, HostedUnit, UnitDescriptor, UnitFactory, UnitKind};

    // Playback
    pub use crate::{DrainStatus, PlaybackMode, PlaybackSource, SchedulerState, SessionStatus};

    // Drivers
    pub use crate::{OfflineDriver, OutputDriver, ThreadDriver};

    // MIDI
    pub use crate::{EventInjector, ScheduledEvent};

    pub use crate::{Error, Result};
}
