//! Fixed 3-byte performance events.

use serde::{Deserialize, Serialize};

/// Channel-voice status nibbles (channel 0).
pub mod status {
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const POLY_PRESSURE: u8 = 0xA0;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    pub const CHANNEL_PRESSURE: u8 = 0xD0;
    pub const PITCH_BEND: u8 = 0xE0;
    pub const SYSTEM: u8 = 0xF0;
}

/// Controller number of the silence event sent before and after a note run.
pub const SILENCE_CONTROLLER: u8 = 60;

/// When the receiving unit should apply the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EventTiming {
    /// Apply at the start of the next render cycle.
    #[default]
    Immediate,
}

/// A 3-byte event handed to an instrument unit.
///
/// `Copy` and heap-free, so it moves through the bounded event slots without
/// allocating on either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub timing: EventTiming,
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

impl ScheduledEvent {
    #[inline]
    pub const fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self {
            timing: EventTiming::Immediate,
            status,
            data1: data1 & 0x7F,
            data2: data2 & 0x7F,
        }
    }

    #[inline]
    pub const fn note_on(note: u8, velocity: u8) -> Self {
        Self::new(status::NOTE_ON, note, velocity)
    }

    #[inline]
    pub const fn note_off(note: u8, velocity: u8) -> Self {
        Self::new(status::NOTE_OFF, note, velocity)
    }

    #[inline]
    pub const fn control_change(controller: u8, value: u8) -> Self {
        Self::new(status::CONTROL_CHANGE, controller, value)
    }

    /// Control change 60 with value 0, sent to quiet an instrument.
    #[inline]
    pub const fn silence() -> Self {
        Self::control_change(SILENCE_CONTROLLER, 0)
    }

    #[inline]
    pub const fn as_bytes(&self) -> [u8; 3] {
        [self.status, self.data1, self.data2]
    }

    /// Status with the channel nibble removed.
    #[inline]
    pub const fn kind(&self) -> u8 {
        if self.status >= status::SYSTEM {
            self.status
        } else {
            self.status & 0xF0
        }
    }

    #[inline]
    pub const fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    /// Note-on with non-zero velocity.
    #[inline]
    pub const fn is_note_on(&self) -> bool {
        self.kind() == status::NOTE_ON && self.data2 > 0
    }

    /// Note-off, or note-on with zero velocity.
    #[inline]
    pub const fn is_note_off(&self) -> bool {
        self.kind() == status::NOTE_OFF || (self.kind() == status::NOTE_ON && self.data2 == 0)
    }

    #[inline]
    pub const fn is_silence(&self) -> bool {
        self.kind() == status::CONTROL_CHANGE
            && self.data1 == SILENCE_CONTROLLER
            && self.data2 == 0
    }
}
