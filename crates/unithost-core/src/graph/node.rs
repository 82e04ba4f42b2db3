//! Node identity and the render-side node interface.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::buffer::{AudioBuffer, AudioFormat};
use crate::unit::UnitKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a node is for. Used for wiring snapshots and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    Player,
    Unit(UnitKind),
    MainMixer,
    Output,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Player => f.write_str("player"),
            NodeRole::Unit(UnitKind::Effect) => f.write_str("effect"),
            NodeRole::Unit(UnitKind::Instrument) => f.write_str("instrument"),
            NodeRole::MainMixer => f.write_str("mixer"),
            NodeRole::Output => f.write_str("output"),
        }
    }
}

/// A processing stage as seen by the renderer.
///
/// `prepare` runs on the control thread when the node is attached. Everything
/// else runs on the audio thread and must not block or allocate.
pub trait RenderNode: Send {
    fn role(&self) -> NodeRole;

    fn label(&self) -> &str;

    fn output_format(&self) -> AudioFormat;

    fn input_bus_count(&self) -> usize;

    fn prepare(&mut self, max_frames: usize);

    /// Input bus buffer, or `None` for a bus the node does not have.
    fn input_mut(&mut self, bus: usize) -> Option<&mut AudioBuffer>;

    /// Produce `frames` frames into the output buffer from the current inputs.
    fn process(&mut self, frames: usize);

    fn output(&self) -> &AudioBuffer;
}

/// Terminal node; its output is whatever arrived on bus 0.
pub struct OutputNode {
    format: AudioFormat,
    input: AudioBuffer,
}

impl OutputNode {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            input: AudioBuffer::new(format.channels, 0),
        }
    }
}

impl RenderNode for OutputNode {
    fn role(&self) -> NodeRole {
        NodeRole::Output
    }

    fn label(&self) -> &str {
        "output"
    }

    fn output_format(&self) -> AudioFormat {
        self.format
    }

    fn input_bus_count(&self) -> usize {
        1
    }

    fn prepare(&mut self, max_frames: usize) {
        self.input = AudioBuffer::new(self.format.channels, max_frames);
    }

    fn input_mut(&mut self, bus: usize) -> Option<&mut AudioBuffer> {
        (bus == 0).then_some(&mut self.input)
    }

    fn process(&mut self, _frames: usize) {}

    fn output(&self) -> &AudioBuffer {
        &self.input
    }
}
