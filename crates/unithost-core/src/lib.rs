//! Live audio graph hosting with a serialized controller and a note scheduler.
//!
//! # Primary API
//!
//! - [`GraphController`]: start/stop/toggle playback, replace the active unit
//! - [`NoteScheduler`]: synthetic note events for instrument units
//! - [`UnitHandle`] / [`HostedUnit`]: the boundary to hosted processing units
//! - [`OutputDriver`]: the render engine ([`OfflineDriver`], [`ThreadDriver`],
//!   `CpalDriver` with the `cpal` feature)
//!
//! # Example
//!
//! ```ignore
//! use unithost_core::*;
//!
//! let config = HostConfig::default();
//! let driver = OfflineDriver::new(AudioFormat::new(config.sample_rate, config.channels));
//! let controller = GraphController::open(config, SchedulerConfig::default(), Box::new(driver))?;
//!
//! controller.start_playing()?;
//! controller.connect(Some(unit), |status| println!("{:?}", status.mode))?;
//! ```

pub mod error;
pub use error::{Error, Result};

mod buffer;
pub use buffer::{AudioBuffer, AudioFormat};

mod config;
pub use config::{HostConfig, SchedulerConfig};

pub(crate) mod lockfree;
pub use lockfree::{AtomicDouble, AtomicFlag, AtomicFloat};

pub mod graph;
pub use graph::{
    AudioFile, AudioGraph, GraphRenderer, MixerBus, MixerControl, NodeId, NodeRole, Wire,
};

mod unit;
pub use unit::{HostedUnit, UnitDescriptor, UnitFactory, UnitHandle, UnitKind};

mod driver;
#[cfg(feature = "cpal")]
pub use driver::CpalDriver;
pub use driver::{CaptureReader, OfflineDriver, OfflineTap, OutputDriver, ThreadDriver};

mod scheduler;
pub use scheduler::{DrainStatus, NoteSchedule, NoteScheduler, SchedulerState};

mod controller;
pub use controller::{
    GraphController, MidiForwarder, PlaybackMode, PlaybackSource, SessionStatus,
};

/// MIDI types used at the unit boundary.
pub use unithost_midi as midi;
