//! Output drivers: whatever pulls audio from the graph.
//!
//! - [`OfflineDriver`]: rendered on demand through an [`OfflineTap`]
//! - [`ThreadDriver`]: background thread pulling at the hardware period
//! - `CpalDriver` (feature `cpal`): system audio output

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, info};

use crate::buffer::AudioFormat;
use crate::graph::GraphRenderer;
use crate::lockfree::AtomicFlag;
use crate::{Error, Result};

/// The render engine as the controller sees it.
pub trait OutputDriver: Send {
    fn name(&self) -> &str;

    /// Begin pulling from `renderer`. Starting a running driver is a no-op.
    fn start(&mut self, renderer: GraphRenderer) -> Result<()>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Driver with no clock of its own; audio is pulled through [`OfflineTap`].
pub struct OfflineDriver {
    tap: OfflineTap,
}

impl OfflineDriver {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            tap: OfflineTap {
                renderer: Arc::new(ArcSwapOption::empty()),
                channels: format.channels,
            },
        }
    }

    pub fn tap(&self) -> OfflineTap {
        self.tap.clone()
    }
}

impl OutputDriver for OfflineDriver {
    fn name(&self) -> &str {
        "offline"
    }

    fn start(&mut self, renderer: GraphRenderer) -> Result<()> {
        if renderer.channels() != self.tap.channels {
            return Err(Error::FormatMismatch {
                expected: format!("{} ch", self.tap.channels),
                found: format!("{} ch", renderer.channels()),
            });
        }
        self.tap.renderer.store(Some(Arc::new(renderer)));
        Ok(())
    }

    fn stop(&mut self) {
        self.tap.renderer.store(None);
    }

    fn is_running(&self) -> bool {
        self.tap.is_running()
    }
}

/// Pull side of an [`OfflineDriver`]. Stands in for a hardware callback.
#[derive(Clone)]
pub struct OfflineTap {
    renderer: Arc<ArcSwapOption<GraphRenderer>>,
    channels: usize,
}

impl OfflineTap {
    pub fn is_running(&self) -> bool {
        self.renderer.load().is_some()
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Render into `out`. Returns `false` (and writes silence) while stopped.
    pub fn render_into(&self, out: &mut [f32]) -> bool {
        match self.renderer.load().as_ref() {
            Some(renderer) => {
                renderer.render(out);
                true
            }
            None => {
                out.fill(0.0);
                false
            }
        }
    }

    /// Render `frames` frames into a new interleaved buffer.
    pub fn pull(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * self.channels];
        self.render_into(&mut out);
        out
    }
}

/// Drives the graph from a background thread at `period_frames` per cycle.
pub struct ThreadDriver {
    format: AudioFormat,
    period_frames: usize,
    running: Arc<AtomicFlag>,
    thread: Option<JoinHandle<Option<HeapProd<f32>>>>,
    capture: Option<HeapProd<f32>>,
}

impl ThreadDriver {
    pub fn new(format: AudioFormat, period_frames: usize) -> Self {
        Self {
            format,
            period_frames: period_frames.max(1),
            running: Arc::new(AtomicFlag::new(false)),
            thread: None,
            capture: None,
        }
    }

    /// Also copy everything rendered into a ring of `capacity_frames` frames.
    /// Samples that do not fit are dropped.
    pub fn with_capture(mut self, capacity_frames: usize) -> (Self, CaptureReader) {
        let rb = HeapRb::<f32>::new(capacity_frames.max(1) * self.format.channels);
        let (producer, consumer) = rb.split();
        self.capture = Some(producer);
        let reader = CaptureReader {
            consumer,
            channels: self.format.channels,
        };
        (self, reader)
    }

    fn period(&self) -> Duration {
        Duration::from_secs_f64(self.period_frames as f64 / self.format.sample_rate)
    }
}

impl OutputDriver for ThreadDriver {
    fn name(&self) -> &str {
        "render-thread"
    }

    fn start(&mut self, renderer: GraphRenderer) -> Result<()> {
        if self.running.get() {
            return Ok(());
        }
        self.running.set(true);

        let running = Arc::clone(&self.running);
        let period = self.period();
        let mut buffer = vec![0.0f32; self.period_frames * renderer.channels()];
        let mut capture = self.capture.take();

        let spawned = thread::Builder::new()
            .name("unithost-render".into())
            .spawn(move || {
                let mut next = Instant::now();
                while running.get() {
                    renderer.render(&mut buffer);
                    if let Some(producer) = capture.as_mut() {
                        producer.push_slice(&buffer);
                    }
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
                capture
            });

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                info!(period_frames = self.period_frames, "render thread started");
                Ok(())
            }
            Err(e) => {
                self.running.set(false);
                Err(Error::EngineStart(e.to_string()))
            }
        }
    }

    fn stop(&mut self) {
        self.running.set(false);
        if let Some(handle) = self.thread.take() {
            if let Ok(capture) = handle.join() {
                self.capture = capture;
            }
            debug!("render thread stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.running.get()
    }
}

impl Drop for ThreadDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reads audio captured by a [`ThreadDriver`].
pub struct CaptureReader {
    consumer: HeapCons<f32>,
    channels: usize,
}

impl CaptureReader {
    /// Frames waiting to be read.
    pub fn available_frames(&self) -> usize {
        self.consumer.occupied_len() / self.channels
    }

    /// Take everything captured so far.
    pub fn read_available(&mut self) -> Vec<f32> {
        let mut out = vec![0.0; self.consumer.occupied_len()];
        let n = self.consumer.pop_slice(&mut out);
        out.truncate(n);
        out
    }
}

#[cfg(feature = "cpal")]
pub use self::cpal_output::CpalDriver;

#[cfg(feature = "cpal")]
mod cpal_output {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    use super::OutputDriver;
    use crate::graph::GraphRenderer;
    use crate::{Error, Result};

    /// Largest callback handled in one render call; bigger callbacks loop.
    const SCRATCH_FRAMES: usize = 4096;

    /// Wrapper to hold a `cpal::Stream` in a `Send` context.
    ///
    /// `cpal::Stream` is `!Send` due to platform internals.
    struct StreamHandle(#[allow(dead_code)] cpal::Stream);

    // SAFETY: the driver lives in the controller state, which only the
    // controller queue thread touches. The stream is created, used and dropped
    // there.
    unsafe impl Send for StreamHandle {}

    /// System audio output through CPAL.
    pub struct CpalDriver {
        output_device_index: Option<usize>,
        stream: Option<StreamHandle>,
    }

    impl CpalDriver {
        pub fn new(output_device_index: Option<usize>) -> Self {
            Self {
                output_device_index,
                stream: None,
            }
        }

        /// List available output devices.
        pub fn list_output_devices() -> Result<Vec<String>> {
            let host = cpal::default_host();
            let devices = host
                .output_devices()?
                .enumerate()
                .map(|(idx, device)| {
                    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
                    format!("{}: {}", idx, name)
                })
                .collect();
            Ok(devices)
        }

        fn get_device(index: Option<usize>) -> Result<cpal::Device> {
            let host = cpal::default_host();

            if let Some(idx) = index {
                let devices: Vec<_> = host.output_devices()?.collect();
                let device_count = devices.len();
                devices.into_iter().nth(idx).ok_or_else(|| {
                    Error::InvalidDevice(format!(
                        "Output device index {} out of range (available: {})",
                        idx, device_count
                    ))
                })
            } else {
                host.default_output_device()
                    .ok_or_else(|| Error::InvalidDevice("No output device available".to_string()))
            }
        }

        fn build_stream<T>(
            device: &cpal::Device,
            config: &cpal::StreamConfig,
            renderer: GraphRenderer,
        ) -> Result<cpal::Stream>
        where
            T: cpal::SizedSample + cpal::FromSample<f32>,
        {
            let device_channels = config.channels as usize;
            let graph_channels = renderer.channels();
            let mut scratch = vec![0.0f32; SCRATCH_FRAMES * graph_channels];

            let stream = device.build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        for block in data.chunks_mut(SCRATCH_FRAMES * device_channels) {
                            let frames = block.len() / device_channels;
                            let rendered = &mut scratch[..frames * graph_channels];
                            renderer.render(rendered);

                            for (i, sample) in block.iter_mut().enumerate() {
                                let channel = i % device_channels;
                                let frame = i / device_channels;
                                let value = if channel < graph_channels {
                                    rendered[frame * graph_channels + channel]
                                } else {
                                    0.0
                                };
                                *sample = T::from_sample(value);
                            }
                        }
                    }));

                    if result.is_err() {
                        // Panic in callback - output silence
                        for sample in data.iter_mut() {
                            *sample = T::from_sample(0.0);
                        }
                    }
                },
                |_err| {
                    // Stream errors arrive on the audio thread; nothing to do there.
                },
                None,
            )?;

            Ok(stream)
        }
    }

    impl OutputDriver for CpalDriver {
        fn name(&self) -> &str {
            "cpal"
        }

        fn start(&mut self, renderer: GraphRenderer) -> Result<()> {
            if self.stream.is_some() {
                return Ok(());
            }

            let device = Self::get_device(self.output_device_index)?;
            let config = device.default_output_config()?;

            let stream = match config.sample_format() {
                cpal::SampleFormat::F32 => {
                    Self::build_stream::<f32>(&device, &config.into(), renderer)?
                }
                cpal::SampleFormat::I16 => {
                    Self::build_stream::<i16>(&device, &config.into(), renderer)?
                }
                cpal::SampleFormat::U16 => {
                    Self::build_stream::<u16>(&device, &config.into(), renderer)?
                }
                format => {
                    return Err(Error::InvalidConfig(format!(
                        "Unsupported sample format: {:?}",
                        format
                    )));
                }
            };

            stream.play()?;
            self.stream = Some(StreamHandle(stream));
            Ok(())
        }

        fn stop(&mut self) {
            self.stream = None;
        }

        fn is_running(&self) -> bool {
            self.stream.is_some()
        }
    }
}
