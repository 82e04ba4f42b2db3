//! Host and scheduler configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use unithost_midi::DEFAULT_EVENT_CAPACITY;

use crate::{Error, Result};

/// Audio-side settings for a hosting session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    pub sample_rate: f64,
    pub channels: usize,
    /// Largest block the graph renders in one pass; units are configured with it
    /// before their resources are allocated.
    pub max_frames: usize,
    /// Slots per unit event channel.
    pub event_capacity: usize,
    /// Audio file looped through effect units.
    pub asset_path: PathBuf,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            channels: 2,
            max_frames: 512,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            asset_path: PathBuf::from("assets/Synth.wav"),
        }
    }
}

impl HostConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate < 8000.0 || self.sample_rate > 384000.0 {
            return Err(Error::InvalidConfig(format!(
                "sample_rate {} out of range (8000-384000 Hz)",
                self.sample_rate
            )));
        }
        if self.channels == 0 || self.channels > 8 {
            return Err(Error::InvalidConfig(format!(
                "channels {} out of range (1-8)",
                self.channels
            )));
        }
        if self.max_frames == 0 || self.max_frames > 8192 {
            return Err(Error::InvalidConfig(format!(
                "max_frames {} out of range (1-8192)",
                self.max_frames
            )));
        }
        if self.event_capacity == 0 {
            return Err(Error::InvalidConfig("event_capacity must be non-zero".into()));
        }
        Ok(())
    }
}

/// Parameters of the note loop.
///
/// Defaults play a two-octave C major scale from middle C, one note every 1.2 s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub base_note: u8,
    pub velocity: u8,
    /// Semitone intervals walked in order.
    pub steps: Vec<u8>,
    /// Offset at which the run starts over from `base_note`.
    pub reset_offset: u8,
    pub note_length: Duration,
    /// Pause between the opening silence event and the first note.
    pub preroll: Duration,
    pub initial_release: f64,
    pub release_growth: f64,
    pub release_ceiling: f64,
    /// How long `stop()` waits for the loop to drain before cancelling it.
    pub drain_timeout: Duration,
    /// Pending one-shot events before `schedule_*` reports a full queue.
    pub oneshot_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_note: 60,
            velocity: 64,
            steps: vec![2, 2, 1, 2, 2, 2, 1],
            reset_offset: 24,
            note_length: Duration::from_millis(1200),
            preroll: Duration::from_millis(100),
            initial_release: 0.05,
            release_growth: 1.05,
            release_ceiling: 10.0,
            drain_timeout: Duration::from_secs(3),
            oneshot_capacity: 64,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::InvalidConfig("steps must not be empty".into()));
        }
        if self.steps.iter().any(|&step| step == 0) {
            return Err(Error::InvalidConfig("steps must be non-zero".into()));
        }
        let max_step = self.steps.iter().copied().max().unwrap_or(0);
        let highest = u16::from(self.base_note) + u16::from(self.reset_offset) + u16::from(max_step);
        if highest > 127 {
            return Err(Error::InvalidConfig(format!(
                "base_note {} + reset_offset {} can reach note {}, above 127",
                self.base_note, self.reset_offset, highest
            )));
        }
        if self.velocity == 0 || self.velocity > 127 {
            return Err(Error::InvalidConfig(format!(
                "velocity {} out of range (1-127)",
                self.velocity
            )));
        }
        if self.note_length.is_zero() {
            return Err(Error::InvalidConfig("note_length must be non-zero".into()));
        }
        if !(self.initial_release > 0.0 && self.initial_release <= self.release_ceiling) {
            return Err(Error::InvalidConfig(format!(
                "initial_release {} must be in (0, release_ceiling = {}]",
                self.initial_release, self.release_ceiling
            )));
        }
        if !(self.release_growth >= 1.0 && self.release_growth.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "release_growth {} must be finite and >= 1.0",
                self.release_growth
            )));
        }
        if self.drain_timeout.is_zero() {
            return Err(Error::InvalidConfig("drain_timeout must be non-zero".into()));
        }
        if self.oneshot_capacity == 0 {
            return Err(Error::InvalidConfig("oneshot_capacity must be non-zero".into()));
        }
        Ok(())
    }
}
