//! Live audio graph: control-side frontend, render-side plan, and the fixed
//! node types of a hosting session.

mod frontend;
mod mixer;
mod node;
mod player;
mod render;
mod unit_node;

pub use frontend::{AudioGraph, Connection, Wire};
pub use mixer::{MainMixer, MixerBus, MixerControl};
pub use node::{NodeId, NodeRole, OutputNode, RenderNode};
pub use player::{file_player, AudioFile, FilePlayer, PlayerHandle, SegmentDone};
pub use render::GraphRenderer;
pub use unit_node::UnitNode;
