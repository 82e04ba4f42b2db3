//! Note scheduler: synthetic performance events for instrument units.
//!
//! A [`NoteScheduler`] owns two kinds of background work:
//!
//! - the scale loop, started by [`NoteScheduler::play`], which walks
//!   [`NoteSchedule`] and emits a note-on/note-off pair per step until stopped
//! - a one-shot worker relaying single events
//!   ([`NoteScheduler::schedule_instrument_note`], [`NoteScheduler::schedule_cc_for`])
//!
//! Every event goes out through the unit's [`EventInjector`], a bounded channel
//! allocated when the unit was created. Emitting never locks, blocks or allocates.
//!
//! # Lifecycle
//!
//! `Idle → Scheduling → Looping → Draining → Idle`
//!
//! [`NoteScheduler::stop`] clears the playing flag, wakes the loop out of any
//! note hold, and blocks until the loop has sent its closing silence event and
//! marked itself done. If that takes longer than the configured drain timeout
//! the run is cancelled: it emits nothing further and is abandoned.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};
use unithost_midi::{EventInjector, ScheduledEvent};

use crate::config::SchedulerConfig;
use crate::lockfree::{AtomicDouble, AtomicFlag};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SchedulerState {
    #[default]
    Idle,
    Scheduling,
    Looping,
    Draining,
}

impl SchedulerState {
    fn to_u8(self) -> u8 {
        match self {
            SchedulerState::Idle => 0,
            SchedulerState::Scheduling => 1,
            SchedulerState::Looping => 2,
            SchedulerState::Draining => 3,
        }
    }

    fn from_u8(val: u8) -> Self {
        match val {
            1 => SchedulerState::Scheduling,
            2 => SchedulerState::Looping,
            3 => SchedulerState::Draining,
            _ => SchedulerState::Idle,
        }
    }
}

/// How a call to [`NoteScheduler::stop`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrainStatus {
    /// The loop sent its closing event and finished (or was not running).
    Drained,
    /// The loop did not finish in time and was cancelled.
    TimedOut,
}

/// Step, offset and release-time progression of the scale loop.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteSchedule {
    steps: Vec<u8>,
    base_note: u8,
    reset_offset: u8,
    step_index: usize,
    note_offset: u8,
    release_time: f64,
    release_growth: f64,
    release_ceiling: f64,
    iterations: u64,
}

impl NoteSchedule {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            steps: config.steps.clone(),
            base_note: config.base_note,
            reset_offset: config.reset_offset,
            step_index: 0,
            note_offset: 0,
            release_time: config.initial_release,
            release_growth: config.release_growth,
            release_ceiling: config.release_ceiling,
            iterations: 0,
        }
    }

    pub fn current_note(&self) -> u8 {
        self.base_note.saturating_add(self.note_offset)
    }

    pub fn note_offset(&self) -> u8 {
        self.note_offset
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn release_time(&self) -> f64 {
        self.release_time
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Lengthen the release by the growth factor, up to the ceiling.
    pub fn grow_release(&mut self) -> f64 {
        if self.release_time < self.release_ceiling {
            self.release_time = (self.release_time * self.release_growth).min(self.release_ceiling);
        }
        self.iterations += 1;
        self.release_time
    }

    /// Move to the next note. Once the offset has reached the reset point,
    /// offset and step index both return to zero.
    pub fn advance(&mut self) {
        if self.note_offset >= self.reset_offset {
            self.note_offset = 0;
            self.step_index = 0;
            return;
        }
        self.note_offset = self.note_offset.saturating_add(self.steps[self.step_index]);
        self.step_index = (self.step_index + 1) % self.steps.len();
    }
}

/// State shared by every run of one scheduler.
struct Shared {
    injector: EventInjector,
    config: SchedulerConfig,
    state: AtomicU8,
    done: AtomicFlag,
    release_time: AtomicDouble,
    note_offset: AtomicU8,
    runs_completed: AtomicU64,
    emitted: AtomicU64,
}

impl Shared {
    #[inline]
    fn set_state(&self, state: SchedulerState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    #[inline]
    fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    fn emit(&self, event: ScheduledEvent) {
        if self.injector.inject(event) {
            self.emitted.fetch_add(1, Ordering::Relaxed);
        } else {
            trace!(?event, "event dropped by full injector");
        }
    }

    fn mark_done(&self) {
        self.done.set(true);
        self.runs_completed.fetch_add(1, Ordering::AcqRel);
        self.set_state(SchedulerState::Idle);
    }
}

#[derive(Default)]
struct LoopSignal {
    stop_requested: bool,
    drained: bool,
}

/// Per-run flags. A cancelled run keeps its own copy, so it can never touch
/// the next run.
struct RunControl {
    playing: AtomicFlag,
    cancelled: AtomicFlag,
    signal: Mutex<LoopSignal>,
    wake: Condvar,
}

impl RunControl {
    fn new() -> Self {
        Self {
            playing: AtomicFlag::new(true),
            cancelled: AtomicFlag::new(false),
            signal: Mutex::new(LoopSignal::default()),
            wake: Condvar::new(),
        }
    }

    /// Sleep for `duration`, returning early once a stop is requested.
    fn hold(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let mut signal = self.signal.lock();
        while !signal.stop_requested {
            if self.wake.wait_until(&mut signal, deadline).timed_out() {
                break;
            }
        }
    }

    fn request_stop(&self) {
        self.playing.set(false);
        self.signal.lock().stop_requested = true;
        self.wake.notify_all();
    }

    /// Wait for the loop to drain; on timeout, cancel it. Returns whether it drained.
    fn drain_or_cancel(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signal = self.signal.lock();
        while !signal.drained {
            if self.wake.wait_until(&mut signal, deadline).timed_out() {
                break;
            }
        }
        if !signal.drained {
            self.cancelled.set(true);
        }
        signal.drained
    }

    /// Run `f` unless this run has been cancelled. Cancellation is decided
    /// under the same lock, so nothing runs after `drain_or_cancel` gives up.
    fn unless_cancelled(&self, f: impl FnOnce()) {
        let _signal = self.signal.lock();
        if !self.cancelled.get() {
            f();
        }
    }

    #[inline]
    fn emit(&self, shared: &Shared, event: ScheduledEvent) {
        self.unless_cancelled(|| shared.emit(event));
    }
}

struct LoopRun {
    control: Arc<RunControl>,
    handle: JoinHandle<()>,
}

enum OneShot {
    Note { on: bool, note: u8, velocity: u8 },
    Control { controller: u8, value: u8 },
}

/// Drives one instrument unit with synthetic events.
pub struct NoteScheduler {
    shared: Arc<Shared>,
    run: Mutex<Option<LoopRun>>,
    oneshots: Option<Sender<OneShot>>,
    oneshot_worker: Option<JoinHandle<()>>,
}

impl NoteScheduler {
    pub fn new(injector: EventInjector, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            injector,
            release_time: AtomicDouble::new(config.initial_release),
            config,
            state: AtomicU8::new(SchedulerState::Idle.to_u8()),
            done: AtomicFlag::new(false),
            note_offset: AtomicU8::new(0),
            runs_completed: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
        });

        let (tx, rx) = crossbeam_channel::bounded::<OneShot>(shared.config.oneshot_capacity);
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("unithost-oneshot".into())
            .spawn(move || {
                for oneshot in rx.iter() {
                    let event = match oneshot {
                        OneShot::Note {
                            on: true,
                            note,
                            velocity,
                        } => ScheduledEvent::note_on(note, velocity),
                        OneShot::Note {
                            on: false,
                            note,
                            velocity,
                        } => ScheduledEvent::note_off(note, velocity),
                        OneShot::Control { controller, value } => {
                            ScheduledEvent::control_change(controller, value)
                        }
                    };
                    worker_shared.emit(event);
                }
            })?;

        Ok(Self {
            shared,
            run: Mutex::new(None),
            oneshots: Some(tx),
            oneshot_worker: Some(worker),
        })
    }

    /// Start the scale loop. No-op while a run is scheduling or looping.
    pub fn play(&self) -> Result<()> {
        let mut run = self.run.lock();
        match self.shared.state() {
            SchedulerState::Scheduling | SchedulerState::Looping => return Ok(()),
            SchedulerState::Idle | SchedulerState::Draining => {}
        }

        // A previous run that drained on its own, or is draining now.
        if let Some(previous) = run.take() {
            previous.control.request_stop();
            if previous.control.drain_or_cancel(self.shared.config.drain_timeout) {
                let _ = previous.handle.join();
            } else {
                warn!("previous note loop did not drain; abandoning it");
                self.shared.mark_done();
            }
        }

        let control = Arc::new(RunControl::new());
        self.shared.done.set(false);
        self.shared.set_state(SchedulerState::Scheduling);

        let shared = Arc::clone(&self.shared);
        let loop_control = Arc::clone(&control);
        let handle = thread::Builder::new()
            .name("unithost-note-loop".into())
            .spawn(move || run_loop(&shared, &loop_control))
            .map_err(|e| {
                self.shared.set_state(SchedulerState::Idle);
                Error::Io(e)
            })?;

        *run = Some(LoopRun { control, handle });
        info!("note loop started");
        Ok(())
    }

    /// Stop the scale loop and wait for it to drain.
    pub fn stop(&self) -> DrainStatus {
        let mut run = self.run.lock();
        let Some(current) = run.take() else {
            return DrainStatus::Drained;
        };

        if self.shared.state() != SchedulerState::Idle {
            self.shared.set_state(SchedulerState::Draining);
        }
        current.control.request_stop();

        if current
            .control
            .drain_or_cancel(self.shared.config.drain_timeout)
        {
            let _ = current.handle.join();
            debug!("note loop drained");
            DrainStatus::Drained
        } else {
            // The cancelled thread is detached; it exits on its own.
            self.shared.mark_done();
            warn!(
                timeout_ms = self.shared.config.drain_timeout.as_millis() as u64,
                "note loop did not drain in time; cancelled"
            );
            DrainStatus::TimedOut
        }
    }

    /// Emit a single note-on or note-off right away, outside the loop.
    pub fn schedule_instrument_note(&self, on: bool, note: u8, velocity: u8) -> Result<()> {
        trace!(on, note, velocity, "one-shot note");
        self.send_oneshot(OneShot::Note { on, note, velocity })
    }

    /// Emit a single control change right away, outside the loop.
    pub fn schedule_cc_for(&self, controller: u8, value: u8) -> Result<()> {
        trace!(controller, value, "one-shot control change");
        self.send_oneshot(OneShot::Control { controller, value })
    }

    fn send_oneshot(&self, oneshot: OneShot) -> Result<()> {
        let Some(tx) = self.oneshots.as_ref() else {
            return Err(Error::ScheduleQueueFull);
        };
        match tx.try_send(oneshot) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                Err(Error::ScheduleQueueFull)
            }
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state()
    }

    /// True from `play()` until the loop observes a stop request.
    pub fn is_playing(&self) -> bool {
        self.run
            .lock()
            .as_ref()
            .is_some_and(|run| run.control.playing.get())
    }

    /// Set once per run, after the closing silence event.
    pub fn is_done(&self) -> bool {
        self.shared.done.get()
    }

    /// Runs that have finished since this scheduler was created.
    pub fn runs_completed(&self) -> u64 {
        self.shared.runs_completed.load(Ordering::Acquire)
    }

    /// Release time reached by the current or last run.
    pub fn release_time(&self) -> f64 {
        self.shared.release_time.get()
    }

    /// Offset of the note the loop is on (or will play next).
    pub fn note_offset(&self) -> u8 {
        self.shared.note_offset.load(Ordering::Relaxed)
    }

    /// Events delivered to the unit so far.
    pub fn events_emitted(&self) -> u64 {
        self.shared.emitted.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Whether this scheduler delivers to `injector`'s unit.
    pub fn targets(&self, injector: &EventInjector) -> bool {
        self.shared.injector.same_target(injector)
    }
}

impl Drop for NoteScheduler {
    fn drop(&mut self) {
        self.stop();
        self.oneshots.take();
        if let Some(worker) = self.oneshot_worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for NoteScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteScheduler")
            .field("state", &self.state())
            .field("done", &self.is_done())
            .field("release_time", &self.release_time())
            .finish()
    }
}

fn run_loop(shared: &Shared, control: &RunControl) {
    let config = &shared.config;
    let mut schedule = NoteSchedule::new(config);
    control.unless_cancelled(|| {
        shared.release_time.set(schedule.release_time());
        shared.note_offset.store(0, Ordering::Relaxed);
        shared.emit(ScheduledEvent::silence());
    });
    control.hold(config.preroll);

    control.unless_cancelled(|| {
        if control.playing.get() {
            shared.set_state(SchedulerState::Looping);
        }
    });

    while control.playing.get() {
        let release = schedule.grow_release();
        control.unless_cancelled(|| shared.release_time.set(release));

        let note = schedule.current_note();
        control.emit(shared, ScheduledEvent::note_on(note, config.velocity));
        control.hold(config.note_length);
        control.emit(shared, ScheduledEvent::note_off(note, 0));

        schedule.advance();
        control.unless_cancelled(|| {
            shared
                .note_offset
                .store(schedule.note_offset(), Ordering::Relaxed)
        });
    }

    let mut signal = control.signal.lock();
    if control.cancelled.get() {
        return;
    }
    shared.set_state(SchedulerState::Draining);
    shared.emit(ScheduledEvent::silence());
    shared.mark_done();
    signal.drained = true;
    drop(signal);
    control.wake.notify_all();
    debug!(iterations = schedule.iterations(), "note loop finished");
}
