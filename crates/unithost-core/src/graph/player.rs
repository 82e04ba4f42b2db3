//! Buffered file player.
//!
//! The control side ([`PlayerHandle`]) schedules whole-file segments; the render
//! side ([`FilePlayer`]) plays them back to back and reports each finished
//! segment on a completion channel. Both directions use bounded channels
//! allocated up front, so the render side never blocks or allocates.
//!
//! `stop()` bumps a generation counter. Segments scheduled under an older
//! generation are discarded without a completion.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use super::node::{NodeRole, RenderNode};
use crate::buffer::{AudioBuffer, AudioFormat};
use crate::lockfree::AtomicFlag;
use crate::{Error, Result};

/// Segments that can be queued ahead of the one playing.
const SEGMENT_SLOTS: usize = 8;

/// Decoded audio asset, interleaved f32.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFile {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: f64,
}

impl AudioFile {
    /// Decode a WAV file and lay it out for `channels` output channels.
    pub fn open(path: impl AsRef<Path>, channels: usize) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::AssetNotFound(path.to_path_buf()));
        }

        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1u64 << spec.bits_per_sample.saturating_sub(1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|value| value as f32 * scale))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        let file = Self::from_interleaved(
            samples,
            usize::from(spec.channels),
            f64::from(spec.sample_rate),
        )?;
        debug!(
            path = %path.display(),
            frames = file.frames(),
            channels = file.channels,
            sample_rate = file.sample_rate,
            "audio asset loaded"
        );
        Ok(file.with_channels(channels))
    }

    pub fn from_interleaved(samples: Vec<f32>, channels: usize, sample_rate: f64) -> Result<Self> {
        if channels == 0 {
            return Err(Error::InvalidAsset("asset has no channels".into()));
        }
        if samples.is_empty() || samples.len() % channels != 0 {
            return Err(Error::InvalidAsset(format!(
                "{} samples do not form whole {}-channel frames",
                samples.len(),
                channels
            )));
        }
        Ok(Self {
            samples,
            channels,
            sample_rate,
        })
    }

    /// Re-lay the file for `channels` outputs. Missing channels repeat the
    /// source channels in order; extra source channels are dropped.
    pub fn with_channels(self, channels: usize) -> Self {
        let channels = channels.max(1);
        if channels == self.channels {
            return self;
        }
        let frames = self.frames();
        let mut samples = Vec::with_capacity(frames * channels);
        for frame in self.samples.chunks_exact(self.channels) {
            for ch in 0..channels {
                samples.push(frame[ch % self.channels]);
            }
        }
        Self {
            samples,
            channels,
            sample_rate: self.sample_rate,
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate
    }
}

struct Segment {
    file: Arc<AudioFile>,
    generation: u64,
}

/// A scheduled segment played to its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDone {
    pub generation: u64,
}

struct PlayerShared {
    playing: AtomicFlag,
    generation: AtomicU64,
    frames_played: AtomicU64,
}

/// Create a connected player node and control handle.
pub fn file_player(format: AudioFormat) -> (FilePlayer, PlayerHandle) {
    let shared = Arc::new(PlayerShared {
        playing: AtomicFlag::new(false),
        generation: AtomicU64::new(0),
        frames_played: AtomicU64::new(0),
    });
    let (segment_tx, segment_rx) = crossbeam_channel::bounded(SEGMENT_SLOTS);
    let (done_tx, done_rx) = crossbeam_channel::bounded(SEGMENT_SLOTS * 2);

    let node = FilePlayer {
        format,
        shared: Arc::clone(&shared),
        segments: segment_rx.clone(),
        current: None,
        position: 0,
        completions: done_tx,
        output: AudioBuffer::new(format.channels, 0),
    };
    let handle = PlayerHandle {
        shared,
        segments: segment_tx,
        stale: segment_rx,
        completions: done_rx,
        pending: 0,
    };
    (node, handle)
}

/// Render side of the player.
pub struct FilePlayer {
    format: AudioFormat,
    shared: Arc<PlayerShared>,
    segments: Receiver<Segment>,
    current: Option<Segment>,
    position: usize,
    completions: Sender<SegmentDone>,
    output: AudioBuffer,
}

impl FilePlayer {
    fn next_segment(&mut self, generation: u64) -> Option<Segment> {
        while let Ok(segment) = self.segments.try_recv() {
            if segment.generation == generation {
                return Some(segment);
            }
        }
        None
    }
}

impl RenderNode for FilePlayer {
    fn role(&self) -> NodeRole {
        NodeRole::Player
    }

    fn label(&self) -> &str {
        "player"
    }

    fn output_format(&self) -> AudioFormat {
        self.format
    }

    fn input_bus_count(&self) -> usize {
        0
    }

    fn prepare(&mut self, max_frames: usize) {
        self.output = AudioBuffer::new(self.format.channels, max_frames);
    }

    fn input_mut(&mut self, _bus: usize) -> Option<&mut AudioBuffer> {
        None
    }

    fn process(&mut self, frames: usize) {
        self.output.clear(frames);
        if !self.shared.playing.get() {
            return;
        }

        let generation = self.shared.generation.load(Ordering::Acquire);
        let channels = self.format.channels;
        let mut written = 0;

        while written < frames {
            if self
                .current
                .as_ref()
                .map_or(true, |segment| segment.generation != generation)
            {
                self.current = self.next_segment(generation);
                self.position = 0;
            }
            let Some(segment) = self.current.as_ref() else {
                break;
            };

            let file_frames = segment.file.frames();
            let n = (file_frames - self.position).min(frames - written);
            let start = self.position * channels;
            let copied = self
                .output
                .write_frames(written, &segment.file.samples()[start..start + n * channels]);
            written += copied;
            self.position += copied;

            if self.position >= file_frames {
                let done = SegmentDone {
                    generation: segment.generation,
                };
                let _ = self.completions.try_send(done);
                self.current = None;
                self.position = 0;
            } else if copied == 0 {
                break;
            }
        }

        self.shared
            .frames_played
            .fetch_add(written as u64, Ordering::Relaxed);
    }

    fn output(&self) -> &AudioBuffer {
        &self.output
    }
}

/// Control side of the player. Lives on the controller queue.
pub struct PlayerHandle {
    shared: Arc<PlayerShared>,
    segments: Sender<Segment>,
    stale: Receiver<Segment>,
    completions: Receiver<SegmentDone>,
    pending: usize,
}

impl PlayerHandle {
    /// Queue the whole file after anything already scheduled.
    pub fn schedule_file(&mut self, file: &Arc<AudioFile>) -> Result<()> {
        let segment = Segment {
            file: Arc::clone(file),
            generation: self.shared.generation.load(Ordering::Acquire),
        };
        self.segments
            .try_send(segment)
            .map_err(|_| Error::ScheduleQueueFull)?;
        self.pending += 1;
        Ok(())
    }

    pub fn play(&self) {
        self.shared.playing.set(true);
    }

    /// Halt output, keeping the current position and queued segments.
    pub fn pause(&self) {
        self.shared.playing.set(false);
    }

    /// Halt output and discard everything scheduled.
    pub fn stop(&mut self) {
        self.shared.playing.set(false);
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.pending = 0;
        while self.stale.try_recv().is_ok() {}
        while self.completions.try_recv().is_ok() {}
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.get()
    }

    pub fn pending_segments(&self) -> usize {
        self.pending
    }

    pub fn frames_played(&self) -> u64 {
        self.shared.frames_played.load(Ordering::Relaxed)
    }

    /// Receiver the controller selects on.
    pub fn completion_receiver(&self) -> Receiver<SegmentDone> {
        self.completions.clone()
    }

    /// Account for a finished segment. Returns `false` for segments from an
    /// earlier generation.
    pub fn complete(&mut self, done: SegmentDone) -> bool {
        if done.generation != self.shared.generation.load(Ordering::Acquire) {
            warn!(generation = done.generation, "completion from a stopped schedule");
            return false;
        }
        self.pending = self.pending.saturating_sub(1);
        true
    }
}
