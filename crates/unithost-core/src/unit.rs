//! Hosted unit boundary.
//!
//! A [`HostedUnit`] is an opaque processing stage produced by a [`UnitFactory`].
//! The host only relies on the capabilities exposed here; the DSP inside is the
//! unit's business. [`UnitHandle`] pairs a unit with its [`UnitKind`] and owns
//! its render resources for as long as the handle lives.

use serde::{Deserialize, Serialize};
use tracing::debug;
use unithost_midi::EventInjector;

use crate::buffer::{AudioBuffer, AudioFormat};
use crate::{Error, Result};

/// Whether a unit processes incoming audio or generates it from events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UnitKind {
    #[default]
    Effect,
    Instrument,
}

/// What a factory needs to build a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDescriptor {
    pub name: String,
    pub manufacturer: String,
    pub kind: UnitKind,
}

impl UnitDescriptor {
    pub fn new(name: impl Into<String>, kind: UnitKind) -> Self {
        Self {
            name: name.into(),
            manufacturer: String::new(),
            kind,
        }
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = manufacturer.into();
        self
    }
}

/// Builds units from descriptors.
pub trait UnitFactory: Send + Sync {
    fn create(&self, descriptor: &UnitDescriptor) -> Result<Box<dyn HostedUnit>>;
}

/// An instantiated processing unit.
pub trait HostedUnit: Send {
    fn name(&self) -> &str;

    fn output_format(&self) -> AudioFormat;

    fn maximum_frames_to_render(&self) -> usize;

    /// Only called while render resources are deallocated.
    fn set_maximum_frames_to_render(&mut self, frames: usize);

    fn allocate_render_resources(&mut self) -> Result<()>;

    fn deallocate_render_resources(&mut self);

    fn can_process_in_place(&self) -> bool {
        false
    }

    /// Render `output.valid_frames()` frames. Called on the audio thread.
    ///
    /// Effects receive their input; instruments get `None`. In-place units get
    /// `None` with `output` already holding the input.
    fn render(&mut self, input: Option<&AudioBuffer>, output: &mut AudioBuffer);

    /// Event sink for instruments.
    fn event_injector(&self) -> Option<EventInjector> {
        None
    }

    fn midi_output_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Install the sink for events the unit emits.
    fn set_midi_output(&mut self, _sink: EventInjector) {}
}

/// A unit plus its capability flag, with scoped render resources.
///
/// Resources are deallocated when the handle is dropped, whatever path led there.
pub struct UnitHandle {
    unit: Box<dyn HostedUnit>,
    kind: UnitKind,
    injector: Option<EventInjector>,
    allocated: bool,
}

impl UnitHandle {
    /// Wrap a unit, checking the capabilities its kind requires.
    pub fn new(unit: Box<dyn HostedUnit>, kind: UnitKind) -> Result<Self> {
        let injector = unit.event_injector();
        if kind == UnitKind::Instrument && injector.is_none() {
            return Err(Error::MissingCapability {
                unit: unit.name().to_string(),
                capability: "event injection",
            });
        }
        Ok(Self {
            unit,
            kind,
            injector,
            allocated: false,
        })
    }

    /// Create, configure and allocate a unit in one step.
    pub fn instantiate(
        factory: &dyn UnitFactory,
        descriptor: &UnitDescriptor,
        max_frames: usize,
    ) -> Result<Self> {
        let unit = factory.create(descriptor)?;
        let mut handle = Self::new(unit, descriptor.kind)?;
        handle.set_maximum_frames_to_render(max_frames)?;
        handle.allocate_render_resources()?;
        Ok(handle)
    }

    pub fn set_maximum_frames_to_render(&mut self, frames: usize) -> Result<()> {
        if self.allocated {
            return Err(Error::ResourcesAllocated(self.name().to_string()));
        }
        self.unit.set_maximum_frames_to_render(frames);
        Ok(())
    }

    pub fn allocate_render_resources(&mut self) -> Result<()> {
        if self.allocated {
            return Ok(());
        }
        self.unit.allocate_render_resources()?;
        self.allocated = true;
        debug!(unit = %self.name(), "render resources allocated");
        Ok(())
    }

    pub fn deallocate_render_resources(&mut self) {
        if self.allocated {
            self.unit.deallocate_render_resources();
            self.allocated = false;
            debug!(unit = %self.name(), "render resources released");
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        self.unit.name()
    }

    pub fn output_format(&self) -> AudioFormat {
        self.unit.output_format()
    }

    pub fn maximum_frames_to_render(&self) -> usize {
        self.unit.maximum_frames_to_render()
    }

    pub fn can_process_in_place(&self) -> bool {
        self.unit.can_process_in_place()
    }

    pub fn event_injector(&self) -> Option<&EventInjector> {
        self.injector.as_ref()
    }

    pub fn midi_output_names(&self) -> Vec<String> {
        self.unit.midi_output_names()
    }

    pub fn set_midi_output(&mut self, sink: EventInjector) {
        self.unit.set_midi_output(sink);
    }

    #[inline]
    pub(crate) fn render(&mut self, input: Option<&AudioBuffer>, output: &mut AudioBuffer) {
        self.unit.render(input, output);
    }
}

impl Drop for UnitHandle {
    fn drop(&mut self) {
        self.deallocate_render_resources();
    }
}

impl std::fmt::Debug for UnitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitHandle")
            .field("name", &self.name())
            .field("kind", &self.kind)
            .field("allocated", &self.allocated)
            .finish()
    }
}
