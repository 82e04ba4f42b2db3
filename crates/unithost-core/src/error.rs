//! Error types for unithost-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::graph::NodeId;

/// Error type for unithost-core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Audio asset not found: {}", .0.display())]
    AssetNotFound(PathBuf),

    #[error("Failed to decode audio asset: {0}")]
    AssetDecode(#[from] hound::Error),

    #[error("Invalid audio asset: {0}")]
    InvalidAsset(String),

    #[error("Could not start render engine: {0}")]
    EngineStart(String),

    #[error("Unit '{unit}' is missing a required capability: {capability}")]
    MissingCapability {
        unit: String,
        capability: &'static str,
    },

    #[error("Render resources for '{0}' are already allocated")]
    ResourcesAllocated(String),

    #[error("Failed to allocate render resources for '{unit}': {reason}")]
    ResourceAllocation { unit: String, reason: String },

    #[error("Format mismatch: expected {expected}, found {found}")]
    FormatMismatch { expected: String, found: String },

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Node {node} has no input bus {bus}")]
    InvalidBus { node: NodeId, bus: usize },

    #[error("Graph contains a cycle")]
    GraphCycle,

    #[error("'{operation}' called from the controller queue; re-entrant calls are not allowed")]
    Reentrant { operation: &'static str },

    #[error("Graph controller has shut down")]
    ControllerShutdown,

    #[error("Scheduling queue is full")]
    ScheduleQueueFull,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Midi(#[from] unithost_midi::Error),

    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    #[cfg(feature = "cpal")]
    #[error("Audio device not available")]
    DeviceNotAvailable(#[from] cpal::DefaultStreamConfigError),

    #[cfg(feature = "cpal")]
    #[error("Failed to build audio stream")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[cfg(feature = "cpal")]
    #[error("Failed to play audio stream")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[cfg(feature = "cpal")]
    #[error("Failed to enumerate devices")]
    DevicesError(#[from] cpal::DevicesError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
