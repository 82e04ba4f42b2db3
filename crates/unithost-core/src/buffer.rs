//! Interleaved audio buffers and stream formats.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sample rate and channel count of a node's output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: f64,
    pub channels: usize,
}

impl AudioFormat {
    pub const fn new(sample_rate: f64, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub const fn stereo(sample_rate: f64) -> Self {
        Self::new(sample_rate, 2)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ch @ {} Hz", self.channels, self.sample_rate)
    }
}

/// Interleaved f32 buffer with a fixed frame capacity.
///
/// Storage is allocated once in [`AudioBuffer::new`]; every other method works
/// inside that allocation, so buffers can be reused on the render thread.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    data: Vec<f32>,
    channels: usize,
    capacity: usize,
    valid_frames: usize,
}

impl AudioBuffer {
    pub fn new(channels: usize, capacity_frames: usize) -> Self {
        let channels = channels.max(1);
        Self {
            data: vec![0.0; channels * capacity_frames],
            channels,
            capacity: capacity_frames,
            valid_frames: 0,
        }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn valid_frames(&self) -> usize {
        self.valid_frames
    }

    /// Zero `frames` frames and mark them valid.
    pub fn clear(&mut self, frames: usize) {
        let frames = frames.min(self.capacity);
        self.data[..frames * self.channels].fill(0.0);
        self.valid_frames = frames;
    }

    pub fn set_valid_frames(&mut self, frames: usize) {
        self.valid_frames = frames.min(self.capacity);
    }

    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.data[..self.valid_frames * self.channels]
    }

    #[inline]
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.data[..self.valid_frames * self.channels]
    }

    /// `self += source * gain` over the shared valid range.
    pub fn mix_from(&mut self, source: &AudioBuffer, gain: f32) {
        if source.channels != self.channels || gain.abs() <= 0.0001 {
            return;
        }
        let len = self.valid_frames.min(source.valid_frames) * self.channels;
        for (dst, src) in self.data[..len].iter_mut().zip(&source.data[..len]) {
            *dst += src * gain;
        }
    }

    /// Copy `source` over the shared valid range.
    pub fn copy_from(&mut self, source: &AudioBuffer) {
        if source.channels != self.channels {
            return;
        }
        let len = self.valid_frames.min(source.valid_frames) * self.channels;
        self.data[..len].copy_from_slice(&source.data[..len]);
    }

    pub fn apply_gain(&mut self, gain: f32) {
        let len = self.valid_frames * self.channels;
        for sample in &mut self.data[..len] {
            *sample *= gain;
        }
    }

    /// Absolute peak over the valid range.
    pub fn peak(&self) -> f32 {
        self.samples()
            .iter()
            .fold(0.0f32, |peak, sample| peak.max(sample.abs()))
    }

    /// Write interleaved samples starting at `frame`, returning frames written.
    pub fn write_frames(&mut self, frame: usize, samples: &[f32]) -> usize {
        if frame >= self.capacity {
            return 0;
        }
        let frames = (samples.len() / self.channels).min(self.capacity - frame);
        let start = frame * self.channels;
        let len = frames * self.channels;
        self.data[start..start + len].copy_from_slice(&samples[..len]);
        frames
    }
}
