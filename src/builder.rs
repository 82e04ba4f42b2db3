//! Builder for configuring and constructing a `HostSession`.

use std::path::PathBuf;
use std::sync::Arc;

use crate::core::{
    AudioFile, AudioFormat, GraphController, HostConfig, OutputDriver, SchedulerConfig,
};
use crate::midi::MidiInputBridge;
use crate::{HostSession, Result};

/// Without an explicit driver the session renders on a background thread
/// (or to the default CPAL device when the `cpal` feature is enabled).
///
/// # Example
///
/// ```ignore
/// use unithost::prelude::*;
///
/// let session = HostSession::builder()
///     .sample_rate(48000.0)
///     .asset_path("assets/Synth.wav")
///     .build()?;
///
/// session.start_playing()?;
/// ```
#[derive(Default)]
pub struct HostSessionBuilder {
    config: HostConfig,
    scheduler: SchedulerConfig,
    driver: Option<Box<dyn OutputDriver>>,
    asset: Option<Arc<AudioFile>>,
    #[cfg(feature = "cpal")]
    output_device: Option<usize>,
}

impl HostSessionBuilder {
    /// Default: 44100
    pub fn sample_rate(mut self, sample_rate: f64) -> Self {
        self.config.sample_rate = sample_rate;
        self
    }

    /// Default: 2
    pub fn channels(mut self, channels: usize) -> Self {
        self.config.channels = channels;
        self
    }

    /// Default: 512
    pub fn max_frames(mut self, frames: usize) -> Self {
        self.config.max_frames = frames;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// WAV file looped in effect mode. Ignored when [`asset`](Self::asset) is set.
    pub fn asset_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.asset_path = path.into();
        self
    }

    /// Use already decoded audio instead of loading `asset_path`.
    pub fn asset(mut self, asset: Arc<AudioFile>) -> Self {
        self.asset = Some(asset);
        self
    }

    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    pub fn scheduler(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    pub fn driver(mut self, driver: Box<dyn OutputDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    #[cfg(feature = "cpal")]
    pub fn output_device(mut self, index: usize) -> Self {
        self.output_device = Some(index);
        self
    }

    pub fn build(mut self) -> Result<HostSession> {
        self.config.validate()?;
        self.scheduler.validate()?;

        let format = AudioFormat::new(self.config.sample_rate, self.config.channels);
        let driver = match self.driver.take() {
            Some(driver) => driver,
            None => default_driver(format, &self),
        };

        let asset = match self.asset {
            Some(asset) => asset,
            None => Arc::new(AudioFile::open(
                &self.config.asset_path,
                self.config.channels,
            )?),
        };

        let controller = GraphController::new(self.config.clone(), self.scheduler, driver, asset)?;
        Ok(HostSession::from_parts(
            controller,
            Arc::new(MidiInputBridge::new()),
            self.config,
        ))
    }
}

#[cfg(feature = "cpal")]
fn default_driver(_format: AudioFormat, builder: &HostSessionBuilder) -> Box<dyn OutputDriver> {
    Box::new(crate::core::CpalDriver::new(builder.output_device))
}

#[cfg(not(feature = "cpal"))]
fn default_driver(format: AudioFormat, builder: &HostSessionBuilder) -> Box<dyn OutputDriver> {
    Box::new(crate::core::ThreadDriver::new(
        format,
        builder.config.max_frames,
    ))
}
