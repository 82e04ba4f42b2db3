//! Main mixer node.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::node::{NodeRole, RenderNode};
use crate::buffer::{AudioBuffer, AudioFormat};
use crate::lockfree::AtomicFloat;

/// Mixer inputs. Playback carries the file player (directly or through an
/// effect); Instrument carries an instrument unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MixerBus {
    Playback = 0,
    Instrument = 1,
}

impl MixerBus {
    pub const COUNT: usize = 2;

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Control-side handle to the mixer's output volume.
#[derive(Debug, Clone)]
pub struct MixerControl {
    volume: Arc<AtomicFloat>,
}

impl MixerControl {
    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.set(volume.clamp(0.0, 1.0));
    }
}

pub struct MainMixer {
    format: AudioFormat,
    inputs: [AudioBuffer; MixerBus::COUNT],
    output: AudioBuffer,
    volume: Arc<AtomicFloat>,
}

impl MainMixer {
    pub fn new(format: AudioFormat) -> (Self, MixerControl) {
        let volume = Arc::new(AtomicFloat::new(1.0));
        let mixer = Self {
            format,
            inputs: [
                AudioBuffer::new(format.channels, 0),
                AudioBuffer::new(format.channels, 0),
            ],
            output: AudioBuffer::new(format.channels, 0),
            volume: Arc::clone(&volume),
        };
        (mixer, MixerControl { volume })
    }
}

impl RenderNode for MainMixer {
    fn role(&self) -> NodeRole {
        NodeRole::MainMixer
    }

    fn label(&self) -> &str {
        "main mixer"
    }

    fn output_format(&self) -> AudioFormat {
        self.format
    }

    fn input_bus_count(&self) -> usize {
        MixerBus::COUNT
    }

    fn prepare(&mut self, max_frames: usize) {
        for input in &mut self.inputs {
            *input = AudioBuffer::new(self.format.channels, max_frames);
        }
        self.output = AudioBuffer::new(self.format.channels, max_frames);
    }

    fn input_mut(&mut self, bus: usize) -> Option<&mut AudioBuffer> {
        self.inputs.get_mut(bus)
    }

    fn process(&mut self, frames: usize) {
        self.output.clear(frames);
        for input in &self.inputs {
            self.output.mix_from(input, 1.0);
        }
        let volume = self.volume.get();
        if volume != 1.0 {
            self.output.apply_gain(volume);
        }
    }

    fn output(&self) -> &AudioBuffer {
        &self.output
    }
}
