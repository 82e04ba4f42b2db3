//! Test helpers and fixtures for unithost integration tests
//!
//! Sessions run on an [`OfflineDriver`], so the test pulls audio itself
//! (manual cycle control, no hardware). Units are small deterministic fakes.
//!
//! ## Tolerance Levels
//!
//! Use the appropriate tolerance from [`tolerances`] module:
//! - `FLOAT_EPSILON` (1e-6): Exact operations (passthrough, unity gain)
//! - `SILENCE_THRESHOLD` (0.0001): Silence detection (-80dB)
//! - `INT16_EPSILON`: assets decoded from 16-bit PCM

#![allow(dead_code)]

pub mod tolerances;

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use unithost::core;
use unithost::prelude::*;
use unithost::{event_channel, AudioFile, EventQueue, GraphRenderer, OfflineTap, UnitHandle};

/// Default test sample rate
pub const TEST_SAMPLE_RATE: f64 = 44100.0;

/// Frames pulled per simulated hardware callback
pub const TEST_BUFFER_SIZE: usize = 256;

/// Level of the looping asset used by [`test_session`]
pub const ASSET_LEVEL: f32 = 0.5;

/// Level a [`RecordingInstrument`] outputs while a note is held
pub const NOTE_LEVEL: f32 = 0.25;

/// Scheduler timing short enough for tests.
pub fn fast_scheduler() -> SchedulerConfig {
    SchedulerConfig {
        note_length: Duration::from_millis(5),
        preroll: Duration::from_millis(1),
        drain_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

/// Constant-level stereo asset.
pub fn dc_asset(frames: usize, level: f32) -> Arc<AudioFile> {
    Arc::new(
        AudioFile::from_interleaved(vec![level; frames * 2], 2, TEST_SAMPLE_RATE)
            .expect("valid asset"),
    )
}

/// Install a test log subscriber once. `RUST_LOG` selects what is shown.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Session on an offline driver looping a DC asset. Returns the tap to pull audio.
pub fn test_session() -> (HostSession, OfflineTap) {
    init_tracing();
    let driver = OfflineDriver::new(AudioFormat::new(TEST_SAMPLE_RATE, 2));
    let tap = driver.tap();
    let session = HostSession::builder()
        .sample_rate(TEST_SAMPLE_RATE)
        .max_frames(TEST_BUFFER_SIZE)
        .scheduler(fast_scheduler())
        .driver(Box::new(driver))
        .asset(dc_asset(1024, ASSET_LEVEL))
        .build()
        .expect("Failed to create test session");
    (session, tap)
}

/// Write a 16-bit PCM WAV fixture.
pub fn write_wav(path: &Path, samples: &[i16], channels: u16) {
    let spec = hound::WavSpec {
        channels,
        sample_rate: TEST_SAMPLE_RATE as u32,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
    for &sample in samples {
        writer.write_sample(sample).expect("write sample");
    }
    writer.finalize().expect("finalize wav");
}

/// Poll `condition` every millisecond until it holds or `max_wait_ms` passes.
pub fn wait_until(max_wait_ms: u64, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    let timeout = Duration::from_millis(max_wait_ms);
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Calculate peak amplitude of a signal.
pub fn peak(samples: &[f32]) -> f32 {
    samples
        .iter()
        .map(|s| s.abs())
        .fold(0.0_f32, |a, b| a.max(b))
}

/// Assert that every sample equals `level` within `tolerance`.
pub fn assert_level(samples: &[f32], level: f32, tolerance: f32) {
    assert!(!samples.is_empty());
    for (i, s) in samples.iter().enumerate() {
        assert!(
            approx::abs_diff_eq!(*s, level, epsilon = tolerance),
            "sample {} was {}, expected {}",
            i,
            s,
            level
        );
    }
}

/// Assert that a signal is approximately silent.
pub fn assert_silence(samples: &[f32], tolerance: f32) {
    let max = peak(samples);
    assert!(
        max <= tolerance,
        "Expected silence, but peak amplitude was {}",
        max
    );
}

// =============================================================================
// Fake units
// =============================================================================

/// Instrument that leaves its events queued for the test to inspect.
pub struct ProbeInstrument {
    injector: EventInjector,
}

impl ProbeInstrument {
    pub fn handle() -> (UnitHandle, EventQueue) {
        let (injector, queue) = event_channel(4096);
        let unit = UnitHandle::new(Box::new(Self { injector }), UnitKind::Instrument)
            .expect("instrument handle");
        (unit, queue)
    }
}

impl HostedUnit for ProbeInstrument {
    fn name(&self) -> &str {
        "probe"
    }

    fn output_format(&self) -> AudioFormat {
        AudioFormat::new(TEST_SAMPLE_RATE, 2)
    }

    fn maximum_frames_to_render(&self) -> usize {
        4096
    }

    fn set_maximum_frames_to_render(&mut self, _frames: usize) {}

    fn allocate_render_resources(&mut self) -> core::Result<()> {
        Ok(())
    }

    fn deallocate_render_resources(&mut self) {}

    fn render(&mut self, _input: Option<&AudioBuffer>, _output: &mut AudioBuffer) {}

    fn event_injector(&self) -> Option<EventInjector> {
        Some(self.injector.clone())
    }
}

/// Shared view of the units a [`TestFactory`] has built.
#[derive(Clone, Default)]
pub struct UnitProbe {
    /// Units currently holding render resources.
    pub allocated: Arc<AtomicUsize>,
}

impl UnitProbe {
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }
}

/// Instrument that consumes its events on the render thread, outputs
/// [`NOTE_LEVEL`] while a note is held, and echoes every event to its
/// MIDI output.
pub struct RecordingInstrument {
    name: String,
    injector: EventInjector,
    inbox: EventQueue,
    scratch: [ScheduledEvent; 64],
    held: Option<u8>,
    midi_out: Option<EventInjector>,
    max_frames: usize,
    allocated: bool,
    probe: UnitProbe,
}

impl RecordingInstrument {
    pub fn new(name: &str, probe: UnitProbe) -> Self {
        let (injector, inbox) = event_channel(1024);
        Self {
            name: name.to_string(),
            injector,
            inbox,
            scratch: [ScheduledEvent::silence(); 64],
            held: None,
            midi_out: None,
            max_frames: 512,
            allocated: false,
            probe,
        }
    }
}

impl HostedUnit for RecordingInstrument {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_format(&self) -> AudioFormat {
        AudioFormat::new(TEST_SAMPLE_RATE, 2)
    }

    fn maximum_frames_to_render(&self) -> usize {
        self.max_frames
    }

    fn set_maximum_frames_to_render(&mut self, frames: usize) {
        self.max_frames = frames;
    }

    fn allocate_render_resources(&mut self) -> core::Result<()> {
        self.allocated = true;
        self.probe.allocated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn deallocate_render_resources(&mut self) {
        if self.allocated {
            self.allocated = false;
            self.probe.allocated.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn render(&mut self, _input: Option<&AudioBuffer>, output: &mut AudioBuffer) {
        let count = self.inbox.poll_into(&mut self.scratch);
        for event in &self.scratch[..count] {
            if event.is_note_on() {
                self.held = Some(event.data1);
            } else if event.is_note_off() && self.held == Some(event.data1) {
                self.held = None;
            } else if event.is_silence() {
                self.held = None;
            }
            if let Some(out) = &self.midi_out {
                out.inject(*event);
            }
        }
        let level = if self.held.is_some() { NOTE_LEVEL } else { 0.0 };
        output.samples_mut().fill(level);
    }

    fn event_injector(&self) -> Option<EventInjector> {
        Some(self.injector.clone())
    }

    fn midi_output_names(&self) -> Vec<String> {
        vec!["thru".to_string()]
    }

    fn set_midi_output(&mut self, sink: EventInjector) {
        self.midi_out = Some(sink);
    }
}

/// Effect scaling its input by a fixed gain.
pub struct GainEffect {
    name: String,
    gain: f32,
    max_frames: usize,
    allocated: bool,
    fail_allocation: bool,
    probe: UnitProbe,
}

impl GainEffect {
    pub fn new(name: &str, gain: f32, probe: UnitProbe) -> Self {
        Self {
            name: name.to_string(),
            gain,
            max_frames: 512,
            allocated: false,
            fail_allocation: false,
            probe,
        }
    }

    /// Unit whose maximum block size cannot be raised.
    pub fn fixed_max_frames(mut self, frames: usize) -> Self {
        self.max_frames = frames;
        self
    }

    pub fn failing_allocation(mut self) -> Self {
        self.fail_allocation = true;
        self
    }
}

impl HostedUnit for GainEffect {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_format(&self) -> AudioFormat {
        AudioFormat::new(TEST_SAMPLE_RATE, 2)
    }

    fn maximum_frames_to_render(&self) -> usize {
        self.max_frames
    }

    fn set_maximum_frames_to_render(&mut self, _frames: usize) {}

    fn allocate_render_resources(&mut self) -> core::Result<()> {
        if self.fail_allocation {
            return Err(core::Error::ResourceAllocation {
                unit: self.name.clone(),
                reason: "out of voices".into(),
            });
        }
        self.allocated = true;
        self.probe.allocated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn deallocate_render_resources(&mut self) {
        if self.allocated {
            self.allocated = false;
            self.probe.allocated.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn render(&mut self, input: Option<&AudioBuffer>, output: &mut AudioBuffer) {
        if let Some(input) = input {
            output.copy_from(input);
        }
        output.apply_gain(self.gain);
    }
}

/// Builds [`RecordingInstrument`]s and half-gain [`GainEffect`]s by kind.
#[derive(Default)]
pub struct TestFactory {
    pub probe: UnitProbe,
    pub fail_allocation: bool,
}

impl UnitFactory for TestFactory {
    fn create(&self, descriptor: &UnitDescriptor) -> core::Result<Box<dyn HostedUnit>> {
        Ok(match descriptor.kind {
            UnitKind::Instrument => Box::new(RecordingInstrument::new(
                &descriptor.name,
                self.probe.clone(),
            )),
            UnitKind::Effect => {
                let effect = GainEffect::new(&descriptor.name, 0.5, self.probe.clone());
                if self.fail_allocation {
                    Box::new(effect.failing_allocation())
                } else {
                    Box::new(effect)
                }
            }
        })
    }
}

/// Output driver whose device never opens.
#[derive(Default)]
pub struct FailingDriver {
    pub attempts: Arc<AtomicUsize>,
}

impl OutputDriver for FailingDriver {
    fn name(&self) -> &str {
        "failing"
    }

    fn start(&mut self, _renderer: GraphRenderer) -> core::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(core::Error::InvalidDevice("no such device".into()))
    }

    fn stop(&mut self) {}

    fn is_running(&self) -> bool {
        false
    }
}

/// Flag set once by a `connect` completion.
pub fn completion_flag() -> (Arc<AtomicBool>, impl FnOnce(&SessionStatus) + Send + 'static) {
    let flag = Arc::new(AtomicBool::new(false));
    let inner = Arc::clone(&flag);
    (flag, move |_: &SessionStatus| inner.store(true, Ordering::SeqCst))
}
