//! Graph node wrapping a hosted unit.

use super::node::{NodeRole, RenderNode};
use crate::buffer::{AudioBuffer, AudioFormat};
use crate::unit::{UnitHandle, UnitKind};

/// Owns the [`UnitHandle`] while the unit is attached. Dropping the node
/// releases the unit's render resources.
pub struct UnitNode {
    handle: UnitHandle,
    label: String,
    input: AudioBuffer,
    output: AudioBuffer,
}

impl UnitNode {
    pub fn new(handle: UnitHandle) -> Self {
        let channels = handle.output_format().channels;
        let label = handle.name().to_string();
        Self {
            handle,
            label,
            input: AudioBuffer::new(channels, 0),
            output: AudioBuffer::new(channels, 0),
        }
    }
}

impl RenderNode for UnitNode {
    fn role(&self) -> NodeRole {
        NodeRole::Unit(self.handle.kind())
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn output_format(&self) -> AudioFormat {
        self.handle.output_format()
    }

    fn input_bus_count(&self) -> usize {
        match self.handle.kind() {
            UnitKind::Effect => 1,
            UnitKind::Instrument => 0,
        }
    }

    fn prepare(&mut self, max_frames: usize) {
        let channels = self.handle.output_format().channels;
        self.input = AudioBuffer::new(channels, max_frames);
        self.output = AudioBuffer::new(channels, max_frames);
    }

    fn input_mut(&mut self, bus: usize) -> Option<&mut AudioBuffer> {
        (bus < self.input_bus_count()).then_some(&mut self.input)
    }

    fn process(&mut self, frames: usize) {
        self.output.clear(frames);
        match self.handle.kind() {
            UnitKind::Instrument => self.handle.render(None, &mut self.output),
            UnitKind::Effect if self.handle.can_process_in_place() => {
                self.output.copy_from(&self.input);
                self.handle.render(None, &mut self.output);
            }
            UnitKind::Effect => self.handle.render(Some(&self.input), &mut self.output),
        }
    }

    fn output(&self) -> &AudioBuffer {
        &self.output
    }
}
