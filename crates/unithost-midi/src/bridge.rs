//! Session-owned MIDI input fan-out.
//!
//! One bridge is created per hosting session and handed to whoever needs it.
//! Device callbacks (or tests) push raw bytes through [`MidiInputBridge::dispatch`];
//! every registered [`MidiListener`] sees the decoded message.
//!
//! The listener list is an `ArcSwap` snapshot, so dispatch never takes a lock.
//! Registration is serialized by a mutex and only happens at setup time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use midi_msg::MidiMsg;
use parking_lot::Mutex;
use tracing::debug;

use crate::{InputEvent, InputMessage, Result};

/// Receives decoded MIDI input. Called on the device thread.
pub trait MidiListener: Send + Sync {
    fn on_midi(&self, message: &InputMessage);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ListenerList = Vec<(ListenerId, Arc<dyn MidiListener>)>;

pub struct MidiInputBridge {
    listeners: ArcSwap<ListenerList>,
    edit: Mutex<()>,
    next_id: AtomicU64,
    received: AtomicU64,
    rejected: AtomicU64,
    #[cfg(feature = "midi-io")]
    port: Mutex<Option<port::PortThread>>,
}

impl MidiInputBridge {
    pub fn new() -> Self {
        Self {
            listeners: ArcSwap::from_pointee(Vec::new()),
            edit: Mutex::new(()),
            next_id: AtomicU64::new(1),
            received: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            #[cfg(feature = "midi-io")]
            port: Mutex::new(None),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn MidiListener>) -> ListenerId {
        let _guard = self.edit.lock();
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut next: ListenerList = self.listeners.load().as_ref().clone();
        next.push((id, listener));
        self.listeners.store(Arc::new(next));
        debug!(listener = id.0, "MIDI listener added");
        id
    }

    /// Returns `false` if the listener was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let _guard = self.edit.lock();
        let current = self.listeners.load_full();
        if !current.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next: ListenerList = current
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        self.listeners.store(Arc::new(next));
        debug!(listener = id.0, "MIDI listener removed");
        true
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.load().len()
    }

    /// Decode raw bytes and deliver them to every listener.
    ///
    /// Malformed input is counted and returned as an error; listeners never see it.
    pub fn dispatch(&self, bytes: &[u8], timestamp: Option<u64>) -> Result<()> {
        let message = match InputMessage::parse(bytes, timestamp) {
            Ok(message) => message,
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, ?bytes, "dropping malformed MIDI input");
                return Err(e);
            }
        };
        self.deliver(&message);
        Ok(())
    }

    /// Deliver an already decoded message.
    pub fn deliver(&self, message: &InputMessage) {
        self.received.fetch_add(1, Ordering::Relaxed);
        log_message(message);
        let listeners = self.listeners.load();
        for (_, listener) in listeners.iter() {
            listener.on_midi(message);
        }
    }

    pub fn received_count(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

impl Default for MidiInputBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MidiInputBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiInputBridge")
            .field("listeners", &self.listener_count())
            .field("received", &self.received_count())
            .field("rejected", &self.rejected_count())
            .finish()
    }
}

fn log_message(message: &InputMessage) {
    let channel = message.display_channel();
    match &message.event {
        InputEvent::NoteOn { note, velocity } => {
            debug!(channel, note, velocity, "MIDI note on")
        }
        InputEvent::NoteOff { note, velocity } => {
            debug!(channel, note, velocity, "MIDI note off")
        }
        InputEvent::ControlChange { controller, value } => {
            debug!(channel, controller, value, "MIDI controller")
        }
        InputEvent::Aftertouch {
            note: Some(note),
            pressure,
        } => debug!(channel, note, pressure, "MIDI aftertouch on note"),
        InputEvent::Aftertouch {
            note: None,
            pressure,
        } => debug!(channel, pressure, "MIDI aftertouch"),
        InputEvent::PitchBend { value } => debug!(channel, value, "MIDI pitch wheel"),
        InputEvent::ProgramChange { program } => {
            debug!(channel, program, "MIDI program change")
        }
        InputEvent::SystemCommand { bytes } => match MidiMsg::from_midi(bytes) {
            Ok((msg, _)) => debug!(command = ?msg, ?bytes, "MIDI system command"),
            Err(e) => debug!(error = %e, ?bytes, "unrecognised MIDI system command"),
        },
    }
}

#[cfg(feature = "midi-io")]
mod port {
    use std::sync::{Arc, Weak};
    use std::thread::{self, JoinHandle};

    use crossbeam_channel::Sender;
    use midir::{MidiInput, MidiInputConnection};
    use tracing::{debug, info};

    use super::MidiInputBridge;
    use crate::{Error, Result};

    /// Owns a midir connection on its own thread. Some backends do not allow the
    /// connection to move between threads.
    pub(super) struct PortThread {
        pub(super) name: String,
        shutdown: Sender<()>,
        handle: Option<JoinHandle<()>>,
    }

    impl PortThread {
        fn close(mut self, join: bool) {
            let _ = self.shutdown.send(());
            if let Some(handle) = self.handle.take() {
                if join {
                    let _ = handle.join();
                }
            }
        }
    }

    impl MidiInputBridge {
        /// Names of the available hardware inputs, by index.
        pub fn list_ports() -> Result<Vec<String>> {
            let input = MidiInput::new("unithost-port-list")?;
            Ok(input
                .ports()
                .iter()
                .enumerate()
                .map(|(index, port)| {
                    input
                        .port_name(port)
                        .unwrap_or_else(|_| format!("MIDI Input {index}"))
                })
                .collect())
        }

        /// Connect hardware input `index` to this bridge, replacing any open port.
        pub fn open_port(self: &Arc<Self>, index: usize) -> Result<String> {
            self.close_port();

            let bridge = Arc::downgrade(self);
            let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<String>>(1);
            let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

            let handle = thread::Builder::new()
                .name("unithost-midi-in".into())
                .spawn(move || {
                    let connection = match connect(index, bridge) {
                        Ok((connection, name)) => {
                            let _ = ready_tx.send(Ok(name));
                            connection
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = shutdown_rx.recv();
                    drop(connection);
                })
                .map_err(|e| Error::MidiDevice(e.to_string()))?;

            let name = ready_rx
                .recv()
                .map_err(|_| Error::MidiDevice("MIDI input thread exited".into()))??;

            info!(port = %name, index, "MIDI input opened");
            *self.port.lock() = Some(PortThread {
                name: name.clone(),
                shutdown: shutdown_tx,
                handle: Some(handle),
            });
            Ok(name)
        }

        pub fn close_port(&self) {
            if let Some(port) = self.port.lock().take() {
                debug!(port = %port.name, "MIDI input closed");
                port.close(true);
            }
        }

        pub fn connected_port(&self) -> Option<String> {
            self.port.lock().as_ref().map(|port| port.name.clone())
        }
    }

    impl Drop for MidiInputBridge {
        fn drop(&mut self) {
            // May run on the midir callback thread; never join from here.
            if let Some(port) = self.port.get_mut().take() {
                port.close(false);
            }
        }
    }

    fn connect(
        index: usize,
        bridge: Weak<MidiInputBridge>,
    ) -> Result<(MidiInputConnection<()>, String)> {
        let input = MidiInput::new("unithost-midi-input")?;
        let ports = input.ports();
        let port = ports
            .get(index)
            .ok_or_else(|| Error::MidiPort(format!("MIDI input {index} not found")))?;
        let name = input
            .port_name(port)
            .unwrap_or_else(|_| format!("MIDI Input {index}"));

        let connection = input.connect(
            port,
            "unithost-input",
            move |timestamp, bytes, _| {
                if let Some(bridge) = bridge.upgrade() {
                    let _ = bridge.dispatch(bytes, Some(timestamp));
                }
            },
            (),
        )?;
        Ok((connection, name))
    }
}
