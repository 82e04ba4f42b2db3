//! HostSession: the controller plus the session-owned MIDI input bridge.

use std::sync::Arc;

use tracing::{debug, info};

use crate::core::{
    GraphController, HostConfig, NoteScheduler, SessionStatus, UnitDescriptor, UnitFactory,
    UnitHandle,
};
use crate::midi::{ListenerId, MidiInputBridge, ScheduledEvent};
use crate::Result;

/// One hosting session.
///
/// Owns the [`GraphController`] and the [`MidiInputBridge`]; the bridge feeds
/// the controller's forwarder for as long as the session lives, so device
/// input reaches the active instrument without any process-wide state.
///
/// # Example
///
/// ```ignore
/// use unithost::prelude::*;
///
/// let session = HostSession::builder().build()?;
///
/// let descriptor = UnitDescriptor::new("Keys", UnitKind::Instrument);
/// session.connect_unit(&factory, &descriptor)?;
/// session.start_playing()?;
///
/// // Relayed to the instrument while the session plays.
/// session.send_midi(&[0x90, 60, 100])?;
/// ```
pub struct HostSession {
    controller: GraphController,
    midi: Arc<MidiInputBridge>,
    forwarder: ListenerId,
    config: HostConfig,
}

impl HostSession {
    pub fn builder() -> crate::HostSessionBuilder {
        crate::HostSessionBuilder::default()
    }

    pub(crate) fn from_parts(
        controller: GraphController,
        midi: Arc<MidiInputBridge>,
        config: HostConfig,
    ) -> Self {
        let forwarder = midi.add_listener(Arc::new(controller.midi_forwarder()));
        info!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            "host session ready"
        );
        Self {
            controller,
            midi,
            forwarder,
            config,
        }
    }

    pub fn controller(&self) -> &GraphController {
        &self.controller
    }

    pub fn midi(&self) -> &Arc<MidiInputBridge> {
        &self.midi
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn start_playing(&self) -> Result<()> {
        Ok(self.controller.start_playing()?)
    }

    pub fn stop_playing(&self) -> Result<()> {
        Ok(self.controller.stop_playing()?)
    }

    pub fn toggle_play(&self) -> Result<bool> {
        Ok(self.controller.toggle_play()?)
    }

    pub fn start_midi_playing(&self) -> Result<()> {
        Ok(self.controller.start_midi_playing()?)
    }

    pub fn toggle_midi_play(&self) -> Result<bool> {
        Ok(self.controller.toggle_midi_play()?)
    }

    pub fn is_playing(&self) -> bool {
        self.controller.is_playing()
    }

    /// Instantiate a unit from `factory` and make it the active unit.
    ///
    /// The unit is configured for the session's block size and allocated
    /// before it reaches the graph; if anything fails, its resources are
    /// released again.
    pub fn connect_unit(
        &self,
        factory: &dyn UnitFactory,
        descriptor: &UnitDescriptor,
    ) -> Result<SessionStatus> {
        let unit = UnitHandle::instantiate(factory, descriptor, self.config.max_frames)?;
        debug!(unit = %descriptor.name, kind = ?descriptor.kind, "unit instantiated");
        self.controller.connect(Some(unit), |_| {})?;
        self.status()
    }

    /// Make an already created unit the active one.
    pub fn connect_handle(&self, unit: UnitHandle) -> Result<SessionStatus> {
        self.controller.connect(Some(unit), |_| {})?;
        self.status()
    }

    /// Remove the active unit, restoring pass-through wiring.
    pub fn reset(&self) -> Result<()> {
        Ok(self.controller.reset()?)
    }

    pub fn status(&self) -> Result<SessionStatus> {
        Ok(self.controller.status()?)
    }

    pub fn current_scheduler(&self) -> Option<Arc<NoteScheduler>> {
        self.controller.current_scheduler()
    }

    /// Feed raw MIDI bytes through the session's input bridge, as a device would.
    pub fn send_midi(&self, bytes: &[u8]) -> Result<()> {
        Ok(self.midi.dispatch(bytes, None)?)
    }

    /// Events the active unit has produced on its MIDI outputs.
    pub fn drain_unit_midi_output(&self) -> Result<Vec<ScheduledEvent>> {
        Ok(self.controller.drain_unit_midi_output()?)
    }

    /// Names of the hardware MIDI inputs.
    #[cfg(feature = "midi-io")]
    pub fn list_midi_inputs() -> Result<Vec<String>> {
        Ok(MidiInputBridge::list_ports()?)
    }

    /// Connect a hardware MIDI input to this session. Returns the port name.
    #[cfg(feature = "midi-io")]
    pub fn open_midi_input(&self, index: usize) -> Result<String> {
        Ok(self.midi.open_port(index)?)
    }
}

impl Drop for HostSession {
    fn drop(&mut self) {
        #[cfg(feature = "midi-io")]
        self.midi.close_port();
        self.midi.remove_listener(self.forwarder);
        debug!("host session closed");
    }
}

impl std::fmt::Debug for HostSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSession")
            .field("controller", &self.controller)
            .field("midi", &self.midi)
            .finish()
    }
}
