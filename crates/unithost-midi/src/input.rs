//! Typed MIDI input decoded from raw device bytes.

use midi_msg::{ChannelVoiceMsg, MidiMsg};
use smallvec::SmallVec;

use crate::event::status;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8, velocity: u8 },
    ControlChange { controller: u8, value: u8 },
    /// Polyphonic when `note` is set, channel pressure otherwise.
    Aftertouch { note: Option<u8>, pressure: u8 },
    /// 14-bit value, centre 8192.
    PitchBend { value: u16 },
    ProgramChange { program: u8 },
    SystemCommand { bytes: SmallVec<[u8; 3]> },
}

/// One decoded input message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputMessage {
    /// Zero-based channel. Always 0 for system commands.
    pub channel: u8,
    /// Device timestamp in microseconds, when the source provides one.
    pub timestamp: Option<u64>,
    pub event: InputEvent,
}

impl InputMessage {
    pub fn new(channel: u8, event: InputEvent) -> Self {
        Self {
            channel,
            timestamp: None,
            event,
        }
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Decode raw bytes. Note-on with velocity 0 becomes `NoteOff`.
    ///
    /// System bytes the decoder does not recognise are kept as a raw
    /// `SystemCommand`, so they are logged rather than rejected.
    pub fn parse(bytes: &[u8], timestamp: Option<u64>) -> Result<Self> {
        let first = *bytes.first().ok_or(Error::EmptyMessage)?;
        let (msg, len) = match MidiMsg::from_midi(bytes) {
            Ok(parsed) => parsed,
            Err(_) if first >= status::SYSTEM => {
                return Ok(Self::system(SmallVec::from_slice(bytes), timestamp));
            }
            Err(e) => return Err(e.into()),
        };

        let (channel, event) = match &msg {
            MidiMsg::ChannelVoice { channel, msg } => (*channel as u8, voice_event(*msg)),
            MidiMsg::ChannelMode { channel, .. } => {
                // Channel mode messages are controllers 120-127 on the wire.
                match msg.to_midi().as_slice() {
                    [_, controller, value, ..] => (
                        *channel as u8,
                        InputEvent::ControlChange {
                            controller: *controller,
                            value: *value,
                        },
                    ),
                    other => {
                        return Err(Error::Parse(format!(
                            "channel mode message encoded as {} byte(s)",
                            other.len()
                        )))
                    }
                }
            }
            MidiMsg::SystemCommon { .. } | MidiMsg::SystemRealTime { .. } => {
                let consumed = bytes.get(..len).unwrap_or(bytes);
                return Ok(Self::system(SmallVec::from_slice(consumed), timestamp));
            }
            _ if first >= status::SYSTEM => {
                return Ok(Self::system(SmallVec::from_slice(bytes), timestamp));
            }
            other => {
                return Err(Error::Parse(format!(
                    "unsupported MIDI message {other:?}"
                )))
            }
        };

        Ok(Self {
            channel,
            timestamp,
            event,
        })
    }

    fn system(bytes: SmallVec<[u8; 3]>, timestamp: Option<u64>) -> Self {
        Self {
            channel: 0,
            timestamp,
            event: InputEvent::SystemCommand { bytes },
        }
    }

    /// One-based channel, as shown to users.
    pub fn display_channel(&self) -> u8 {
        self.channel + 1
    }
}

fn voice_event(msg: ChannelVoiceMsg) -> InputEvent {
    match msg {
        ChannelVoiceMsg::NoteOn { note, velocity: 0 } => InputEvent::NoteOff { note, velocity: 0 },
        ChannelVoiceMsg::NoteOn { note, velocity } => InputEvent::NoteOn { note, velocity },
        ChannelVoiceMsg::NoteOff { note, velocity } => InputEvent::NoteOff { note, velocity },
        // 14-bit velocities only appear when a high-res prefix was merged in.
        ChannelVoiceMsg::HighResNoteOn { note, velocity } => match (velocity >> 7) as u8 {
            0 => InputEvent::NoteOff { note, velocity: 0 },
            velocity => InputEvent::NoteOn { note, velocity },
        },
        ChannelVoiceMsg::HighResNoteOff { note, velocity } => InputEvent::NoteOff {
            note,
            velocity: (velocity >> 7) as u8,
        },
        ChannelVoiceMsg::ControlChange { control } => InputEvent::ControlChange {
            controller: control.control(),
            value: control.value(),
        },
        ChannelVoiceMsg::PolyPressure { note, pressure } => InputEvent::Aftertouch {
            note: Some(note),
            pressure,
        },
        ChannelVoiceMsg::ChannelPressure { pressure } => InputEvent::Aftertouch {
            note: None,
            pressure,
        },
        ChannelVoiceMsg::ProgramChange { program } => InputEvent::ProgramChange { program },
        ChannelVoiceMsg::PitchBend { bend } => InputEvent::PitchBend { value: bend },
    }
}
