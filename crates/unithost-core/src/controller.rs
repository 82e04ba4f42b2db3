//! Graph controller: playback and unit rewiring on a single serialization point.
//!
//! Every public operation is packaged as a job and run on one queue thread,
//! which owns the [`AudioGraph`], the output driver, the file player handle and
//! the active unit. Callers block until their job has finished, so `start`,
//! `stop` and `connect` never overlap and always run in submission order.
//!
//! The topology is fixed:
//!
//! ```text
//! effect / no unit:  player ──▶ [effect] ──▶ mixer(playback) ──▶ output
//! instrument:                  instrument ──▶ mixer(instrument) ──▶ output
//! ```
//!
//! # Re-entrancy
//!
//! A `connect` completion runs on the queue thread. Calling back into the
//! controller from there would wait on itself; such calls fail fast with
//! [`Error::Reentrant`] instead.

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use arc_swap::ArcSwapOption;
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use unithost_midi::{
    event_channel, EventInjector, EventQueue, InputEvent, InputMessage, MidiListener,
    ScheduledEvent,
};

use crate::buffer::AudioFormat;
use crate::config::{HostConfig, SchedulerConfig};
use crate::driver::OutputDriver;
use crate::graph::{
    file_player, AudioFile, AudioGraph, MainMixer, MixerBus, MixerControl, NodeId, OutputNode,
    PlayerHandle, SegmentDone, UnitNode, Wire,
};
use crate::lockfree::AtomicFlag;
use crate::scheduler::{DrainStatus, NoteScheduler, SchedulerState};
use crate::unit::{UnitHandle, UnitKind};
use crate::{Error, Result};

/// Which path produces sound. Follows the active unit; never set directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackMode {
    /// File player, optionally through an effect unit.
    #[default]
    Effect,
    /// Instrument unit driven by a [`NoteScheduler`].
    Instrument,
}

impl From<Option<UnitKind>> for PlaybackMode {
    fn from(kind: Option<UnitKind>) -> Self {
        match kind {
            Some(UnitKind::Instrument) => PlaybackMode::Instrument,
            Some(UnitKind::Effect) | None => PlaybackMode::Effect,
        }
    }
}

/// What drives a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackSource {
    /// Looping asset or the scheduler's scale loop.
    #[default]
    Autonomous,
    /// Forwarded MIDI input only.
    MidiInput,
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub is_playing: bool,
    pub mode: PlaybackMode,
    pub source: PlaybackSource,
    pub active_unit: Option<String>,
    pub player_running: bool,
    pub scheduler: Option<SchedulerState>,
    pub wiring: Vec<Wire>,
    pub engine_running: bool,
    pub pending_segments: usize,
}

type Job = Box<dyn FnOnce(&mut ControllerState) + Send>;

enum Command {
    Run(Job),
    Shutdown,
}

type SchedulerSlot = Arc<ArcSwapOption<NoteScheduler>>;

pub struct GraphController {
    jobs: Sender<Command>,
    worker: Option<JoinHandle<()>>,
    queue_thread: ThreadId,
    playing: Arc<AtomicFlag>,
    scheduler: SchedulerSlot,
    mixer: MixerControl,
}

impl GraphController {
    /// Build the graph around `asset` and start the serialization thread.
    ///
    /// The driver is not started until playback begins.
    pub fn new(
        config: HostConfig,
        scheduler_config: SchedulerConfig,
        driver: Box<dyn OutputDriver>,
        asset: Arc<AudioFile>,
    ) -> Result<Self> {
        config.validate()?;
        scheduler_config.validate()?;

        let format = AudioFormat::new(config.sample_rate, config.channels);
        let asset = if asset.channels() == format.channels {
            asset
        } else {
            Arc::new(asset.as_ref().clone().with_channels(format.channels))
        };
        if asset.sample_rate() != format.sample_rate {
            warn!(
                asset_rate = asset.sample_rate(),
                graph_rate = format.sample_rate,
                "asset sample rate differs from graph; playing unconverted"
            );
        }

        let mut graph = AudioGraph::new(format, config.max_frames);
        let (player, player_handle) = file_player(format);
        let (mixer, mixer_control) = MainMixer::new(format);
        let player_id = graph.attach(Box::new(player))?;
        let mixer_id = graph.attach(Box::new(mixer))?;
        let output_id = graph.attach(Box::new(OutputNode::new(format)))?;
        graph.connect(player_id, mixer_id, MixerBus::Playback.index())?;
        graph.connect(mixer_id, output_id, 0)?;
        graph.commit()?;

        let playing = Arc::new(AtomicFlag::new(false));
        let scheduler: SchedulerSlot = Arc::new(ArcSwapOption::empty());

        let state = ControllerState {
            graph,
            driver,
            player: player_handle,
            player_id,
            mixer_id,
            output_id,
            asset,
            active: None,
            playing: Arc::clone(&playing),
            source: PlaybackSource::Autonomous,
            scheduler: Arc::clone(&scheduler),
            scheduler_config,
            event_capacity: config.event_capacity,
        };

        let (jobs, rx) = crossbeam_channel::unbounded();
        let worker = thread::Builder::new()
            .name("unithost-controller".into())
            .spawn(move || run_queue(state, rx))?;
        let queue_thread = worker.thread().id();

        info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            max_frames = config.max_frames,
            "graph controller ready"
        );

        Ok(Self {
            jobs,
            worker: Some(worker),
            queue_thread,
            playing,
            scheduler,
            mixer: mixer_control,
        })
    }

    /// Like [`GraphController::new`], loading the asset from `config.asset_path`.
    pub fn open(
        config: HostConfig,
        scheduler_config: SchedulerConfig,
        driver: Box<dyn OutputDriver>,
    ) -> Result<Self> {
        let asset = AudioFile::open(&config.asset_path, config.channels)?;
        Self::new(config, scheduler_config, driver, Arc::new(asset))
    }

    /// Run `f` on the queue thread and wait for its result.
    fn sync<R, F>(&self, operation: &'static str, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut ControllerState) -> R + Send + 'static,
    {
        if thread::current().id() == self.queue_thread {
            return Err(Error::Reentrant { operation });
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.jobs
            .send(Command::Run(Box::new(move |state| {
                let _ = tx.send(f(state));
            })))
            .map_err(|_| Error::ControllerShutdown)?;
        rx.recv().map_err(|_| Error::ControllerShutdown)
    }

    /// Start autonomous playback in the current mode. No-op while playing.
    pub fn start_playing(&self) -> Result<()> {
        self.sync("start_playing", |state| state.start_playing())?
    }

    /// Stop whatever is playing. No-op while stopped.
    pub fn stop_playing(&self) -> Result<()> {
        self.sync("stop_playing", |state| {
            state.stop_playing();
        })
    }

    /// Start or stop autonomous playback; returns the resulting playing state.
    pub fn toggle_play(&self) -> Result<bool> {
        self.sync("toggle_play", |state| {
            if state.playing.get() {
                state.stop_playing();
            } else {
                state.start_playing()?;
            }
            Ok(state.playing.get())
        })?
    }

    /// Start the engine without the autonomous loop; in instrument mode the
    /// unit is then played by forwarded MIDI input.
    pub fn start_midi_playing(&self) -> Result<()> {
        self.sync("start_midi_playing", |state| state.start_midi_playing())?
    }

    /// Start or stop MIDI-driven playback; returns the resulting playing state.
    pub fn toggle_midi_play(&self) -> Result<bool> {
        self.sync("toggle_midi_play", |state| {
            if state.playing.get() {
                state.stop_playing();
            } else {
                state.start_midi_playing()?;
            }
            Ok(state.playing.get())
        })?
    }

    /// Replace the active unit (or remove it with `None`) and rewire the graph.
    ///
    /// Playback is paused around the rewiring and resumed in the new mode.
    /// `completion` runs on the queue thread once the new wiring is live; it is
    /// not called if the unit cannot be attached.
    pub fn connect<F>(&self, unit: Option<UnitHandle>, completion: F) -> Result<()>
    where
        F: FnOnce(&SessionStatus) + Send + 'static,
    {
        self.sync("connect", move |state| {
            state.connect(unit)?;
            completion(&state.status());
            Ok(())
        })?
    }

    /// Remove the active unit, restoring pass-through wiring.
    pub fn reset(&self) -> Result<()> {
        self.connect(None, |_| {})
    }

    pub fn status(&self) -> Result<SessionStatus> {
        self.sync("status", |state| state.status())
    }

    pub fn is_playing(&self) -> bool {
        self.playing.get()
    }

    /// The scheduler driving the active instrument, if a session is running.
    pub fn current_scheduler(&self) -> Option<Arc<NoteScheduler>> {
        self.scheduler.load_full()
    }

    /// Listener relaying note and control-change input to the current scheduler.
    pub fn midi_forwarder(&self) -> MidiForwarder {
        MidiForwarder {
            scheduler: Arc::clone(&self.scheduler),
            playing: Arc::clone(&self.playing),
        }
    }

    /// Events the active unit has emitted on its MIDI outputs since the last call.
    pub fn drain_unit_midi_output(&self) -> Result<Vec<ScheduledEvent>> {
        self.sync("drain_unit_midi_output", |state| {
            state
                .active
                .as_ref()
                .and_then(|unit| unit.midi_out.as_ref())
                .map(EventQueue::drain)
                .unwrap_or_default()
        })
    }

    pub fn mixer(&self) -> &MixerControl {
        &self.mixer
    }
}

impl Drop for GraphController {
    fn drop(&mut self) {
        let _ = self.jobs.send(Command::Shutdown);
        if thread::current().id() == self.queue_thread {
            return;
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("controller queue thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for GraphController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphController")
            .field("playing", &self.is_playing())
            .field("scheduler", &self.scheduler.load().is_some())
            .finish()
    }
}

fn run_queue(mut state: ControllerState, jobs: Receiver<Command>) {
    let completions = state.player.completion_receiver();
    loop {
        crossbeam_channel::select! {
            recv(jobs) -> command => match command {
                Ok(Command::Run(job)) => job(&mut state),
                Ok(Command::Shutdown) | Err(_) => break,
            },
            recv(completions) -> done => {
                if let Ok(done) = done {
                    state.on_segment_done(done);
                }
            }
        }
    }
    state.shutdown();
    debug!("controller queue stopped");
}

struct ActiveUnit {
    id: NodeId,
    kind: UnitKind,
    name: String,
    injector: Option<EventInjector>,
    midi_out: Option<EventQueue>,
}

/// Everything the queue thread owns.
struct ControllerState {
    graph: AudioGraph,
    driver: Box<dyn OutputDriver>,
    player: PlayerHandle,
    player_id: NodeId,
    mixer_id: NodeId,
    output_id: NodeId,
    asset: Arc<AudioFile>,
    active: Option<ActiveUnit>,
    playing: Arc<AtomicFlag>,
    source: PlaybackSource,
    scheduler: SchedulerSlot,
    scheduler_config: SchedulerConfig,
    event_capacity: usize,
}

impl ControllerState {
    fn mode(&self) -> PlaybackMode {
        PlaybackMode::from(self.active.as_ref().map(|unit| unit.kind))
    }

    fn start_playing(&mut self) -> Result<()> {
        if self.playing.get() {
            return Ok(());
        }
        let mode = self.mode();
        if mode == PlaybackMode::Effect {
            self.arm_effect_loop()?;
        }
        self.wire_output()?;
        if let Err(e) = self.start_engine() {
            self.player.stop();
            return Err(e);
        }

        self.source = PlaybackSource::Autonomous;
        match mode {
            PlaybackMode::Effect => self.player.play(),
            PlaybackMode::Instrument => {
                if let Err(e) = self.start_scheduler(true) {
                    self.driver.stop();
                    return Err(e);
                }
            }
        }
        self.playing.set(true);
        info!(?mode, "playback started");
        Ok(())
    }

    fn start_midi_playing(&mut self) -> Result<()> {
        if self.playing.get() {
            return Ok(());
        }
        self.wire_output()?;
        self.start_engine()?;

        self.source = PlaybackSource::MidiInput;
        if self.mode() == PlaybackMode::Instrument {
            if let Err(e) = self.start_scheduler(false) {
                self.driver.stop();
                return Err(e);
            }
        }
        self.playing.set(true);
        info!(mode = ?self.mode(), "MIDI playback started");
        Ok(())
    }

    fn stop_playing(&mut self) {
        if !self.playing.get() {
            return;
        }
        match self.mode() {
            PlaybackMode::Effect => self.player.stop(),
            PlaybackMode::Instrument => self.stop_scheduler(),
        }
        self.driver.stop();
        self.playing.set(false);
        info!("playback stopped");
    }

    fn connect(&mut self, unit: Option<UnitHandle>) -> Result<()> {
        let previous_mode = self.mode();
        let was_playing = self.playing.get();

        // Nodes cannot be rewired while their path is running.
        if was_playing {
            match previous_mode {
                PlaybackMode::Effect => self.player.pause(),
                PlaybackMode::Instrument => self.stop_scheduler(),
            }
        }

        if let Some(old) = self.active.take() {
            self.graph.detach(old.id)?;
            debug!(unit = %old.name, "unit detached");
        }
        self.graph.connect(
            self.player_id,
            self.mixer_id,
            MixerBus::Playback.index(),
        )?;
        self.graph.connect(self.mixer_id, self.output_id, 0)?;

        let attached = match unit {
            Some(handle) => self.attach_unit(handle),
            None => Ok(()),
        };
        self.graph.commit()?;
        info!(
            unit = self.active.as_ref().map(|unit| unit.name.as_str()),
            mode = ?self.mode(),
            "graph rewired"
        );

        if was_playing {
            self.resume()?;
        }
        attached
    }

    fn attach_unit(&mut self, mut handle: UnitHandle) -> Result<()> {
        let max_frames = self.graph.max_frames();
        if handle.maximum_frames_to_render() < max_frames && !handle.is_allocated() {
            handle.set_maximum_frames_to_render(max_frames)?;
        }
        if handle.maximum_frames_to_render() < max_frames {
            return Err(Error::InvalidConfig(format!(
                "unit {} renders at most {} frames, graph needs {}",
                handle.name(),
                handle.maximum_frames_to_render(),
                max_frames
            )));
        }
        handle.allocate_render_resources()?;

        let kind = handle.kind();
        let name = handle.name().to_string();
        let injector = handle.event_injector().cloned();
        let midi_out = if handle.midi_output_names().is_empty() {
            None
        } else {
            let (sink, queue) = event_channel(self.event_capacity);
            handle.set_midi_output(sink);
            Some(queue)
        };

        let id = self.graph.attach(Box::new(UnitNode::new(handle)))?;
        if let Err(e) = self.wire_unit(id, kind) {
            let _ = self.graph.detach(id);
            self.graph.connect(
                self.player_id,
                self.mixer_id,
                MixerBus::Playback.index(),
            )?;
            return Err(e);
        }

        debug!(unit = %name, ?kind, %id, "unit attached");
        self.active = Some(ActiveUnit {
            id,
            kind,
            name,
            injector,
            midi_out,
        });
        Ok(())
    }

    fn wire_unit(&mut self, id: NodeId, kind: UnitKind) -> Result<()> {
        match kind {
            UnitKind::Effect => {
                self.graph.connect(self.player_id, id, 0)?;
                self.graph
                    .connect(id, self.mixer_id, MixerBus::Playback.index())?;
            }
            UnitKind::Instrument => {
                self.graph.disconnect_node_output(self.player_id);
                self.graph
                    .connect(id, self.mixer_id, MixerBus::Instrument.index())?;
            }
        }
        Ok(())
    }

    /// Pick playback up again in whatever mode the new wiring implies.
    fn resume(&mut self) -> Result<()> {
        match (self.mode(), self.source) {
            (PlaybackMode::Effect, PlaybackSource::Autonomous) => {
                self.arm_effect_loop()?;
                self.player.play();
            }
            (PlaybackMode::Effect, PlaybackSource::MidiInput) => {}
            (PlaybackMode::Instrument, source) => {
                self.start_scheduler(source == PlaybackSource::Autonomous)?;
            }
        }
        debug!(mode = ?self.mode(), source = ?self.source, "playback resumed");
        Ok(())
    }

    fn wire_output(&mut self) -> Result<()> {
        if self.graph.input_of(self.output_id, 0) != Some(self.mixer_id) {
            self.graph.connect(self.mixer_id, self.output_id, 0)?;
            self.graph.commit()?;
        }
        Ok(())
    }

    fn start_engine(&mut self) -> Result<()> {
        if self.driver.is_running() {
            return Ok(());
        }
        self.driver.start(self.graph.renderer()).map_err(|e| {
            error!(driver = self.driver.name(), error = %e, "render engine failed to start");
            Error::EngineStart(e.to_string())
        })
    }

    /// Queue the asset twice so one segment is always waiting behind the
    /// one being played.
    fn arm_effect_loop(&mut self) -> Result<()> {
        if self.player.pending_segments() == 0 {
            self.player.schedule_file(&self.asset)?;
            self.player.schedule_file(&self.asset)?;
        }
        Ok(())
    }

    fn on_segment_done(&mut self, done: SegmentDone) {
        if !self.player.complete(done) {
            return;
        }
        if self.playing.get()
            && self.mode() == PlaybackMode::Effect
            && self.source == PlaybackSource::Autonomous
        {
            if let Err(e) = self.player.schedule_file(&self.asset) {
                warn!(error = %e, "could not re-arm effect loop");
            }
        }
    }

    fn start_scheduler(&mut self, autoplay: bool) -> Result<()> {
        self.stop_scheduler();
        let unit = self.active.as_ref();
        let Some(injector) = unit.and_then(|unit| unit.injector.clone()) else {
            return Err(Error::MissingCapability {
                unit: unit.map(|unit| unit.name.clone()).unwrap_or_default(),
                capability: "event injection",
            });
        };
        let scheduler = NoteScheduler::new(injector, self.scheduler_config.clone())?;
        if autoplay {
            scheduler.play()?;
        }
        self.scheduler.store(Some(Arc::new(scheduler)));
        Ok(())
    }

    fn stop_scheduler(&mut self) {
        if let Some(scheduler) = self.scheduler.swap(None) {
            if scheduler.stop() == DrainStatus::TimedOut {
                warn!("note scheduler cancelled after drain timeout");
            }
        }
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            is_playing: self.playing.get(),
            mode: self.mode(),
            source: self.source,
            active_unit: self.active.as_ref().map(|unit| unit.name.clone()),
            player_running: self.player.is_playing(),
            scheduler: self.scheduler.load().as_ref().map(|s| s.state()),
            wiring: self.graph.wiring(),
            engine_running: self.driver.is_running(),
            pending_segments: self.player.pending_segments(),
        }
    }

    fn shutdown(&mut self) {
        self.stop_scheduler();
        self.player.stop();
        self.driver.stop();
        self.playing.set(false);
    }
}

/// Relays note and control-change input to the current scheduler.
///
/// Input is dropped unless an instrument session is playing.
#[derive(Clone)]
pub struct MidiForwarder {
    scheduler: SchedulerSlot,
    playing: Arc<AtomicFlag>,
}

impl MidiListener for MidiForwarder {
    fn on_midi(&self, message: &InputMessage) {
        if !self.playing.get() {
            return;
        }
        let current = self.scheduler.load();
        let Some(scheduler) = current.as_ref() else {
            return;
        };
        let result = match message.event {
            InputEvent::NoteOn { note, velocity } => {
                scheduler.schedule_instrument_note(true, note, velocity)
            }
            InputEvent::NoteOff { note, velocity } => {
                scheduler.schedule_instrument_note(false, note, velocity)
            }
            InputEvent::ControlChange { controller, value } => {
                scheduler.schedule_cc_for(controller, value)
            }
            _ => return,
        };
        if let Err(e) = result {
            warn!(error = %e, channel = message.display_channel(), "MIDI event not forwarded");
        }
    }
}
