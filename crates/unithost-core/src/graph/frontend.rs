//! Control-side view of the audio graph.
//!
//! Edits (attach, detach, connect, disconnect) only touch the frontend's own
//! bookkeeping. `commit()` sorts the nodes, builds a new [`RenderPlan`] and
//! swaps it in for the renderer. Replaced plans are parked until the render
//! thread has let go of them, so node teardown always happens here and never
//! on the audio thread.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::node::{NodeId, NodeRole, RenderNode};
use super::render::{GraphRenderer, NodeCell, PlanStep, RenderPlan, RenderStats};
use crate::buffer::AudioFormat;
use crate::{Error, Result};

/// Edge from a node's output to one input bus of another node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub source: NodeId,
    pub destination: NodeId,
    pub bus: usize,
}

/// A connection described by node roles, for status snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Wire {
    pub source: NodeRole,
    pub destination: NodeRole,
    pub bus: usize,
}

impl Wire {
    pub const fn new(source: NodeRole, destination: NodeRole, bus: usize) -> Self {
        Self {
            source,
            destination,
            bus,
        }
    }
}

struct NodeEntry {
    cell: NodeCell,
    role: NodeRole,
    input_buses: usize,
}

pub struct AudioGraph {
    format: AudioFormat,
    max_frames: usize,
    nodes: BTreeMap<NodeId, NodeEntry>,
    connections: Vec<Connection>,
    next_id: u32,
    plan: Arc<ArcSwap<RenderPlan>>,
    retired: Vec<Arc<RenderPlan>>,
    stats: Arc<RenderStats>,
    dirty: bool,
}

impl AudioGraph {
    pub fn new(format: AudioFormat, max_frames: usize) -> Self {
        Self {
            format,
            max_frames,
            nodes: BTreeMap::new(),
            connections: Vec::new(),
            next_id: 0,
            plan: Arc::new(ArcSwap::from_pointee(RenderPlan::empty(max_frames))),
            retired: Vec::new(),
            stats: Arc::new(RenderStats::default()),
            dirty: false,
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    /// Renderer reading this graph's committed plans.
    pub fn renderer(&self) -> GraphRenderer {
        GraphRenderer::new(
            Arc::clone(&self.plan),
            Arc::clone(&self.stats),
            self.format.channels,
        )
    }

    /// Add a node. It takes part in rendering after the next `commit()`.
    pub fn attach(&mut self, mut node: Box<dyn RenderNode>) -> Result<NodeId> {
        let format = node.output_format();
        if format.channels != self.format.channels
            || (format.sample_rate - self.format.sample_rate).abs() > f64::EPSILON
        {
            return Err(Error::FormatMismatch {
                expected: self.format.to_string(),
                found: format.to_string(),
            });
        }

        node.prepare(self.max_frames);
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let role = node.role();
        debug!(node = %id, %role, label = node.label(), "node attached");
        self.nodes.insert(
            id,
            NodeEntry {
                role,
                input_buses: node.input_bus_count(),
                cell: Arc::new(Mutex::new(node)),
            },
        );
        self.dirty = true;
        Ok(id)
    }

    /// Remove a node and every connection touching it.
    pub fn detach(&mut self, id: NodeId) -> Result<()> {
        let entry = self.nodes.remove(&id).ok_or(Error::UnknownNode(id))?;
        self.connections
            .retain(|c| c.source != id && c.destination != id);
        debug!(node = %id, role = %entry.role, "node detached");
        self.dirty = true;
        Ok(())
    }

    /// Connect `source`'s output to `destination`'s input `bus`.
    ///
    /// Whatever `source` fed before, and whatever fed `destination` on `bus`,
    /// is disconnected first.
    pub fn connect(&mut self, source: NodeId, destination: NodeId, bus: usize) -> Result<()> {
        if !self.nodes.contains_key(&source) {
            return Err(Error::UnknownNode(source));
        }
        let dest = self
            .nodes
            .get(&destination)
            .ok_or(Error::UnknownNode(destination))?;
        if bus >= dest.input_buses {
            return Err(Error::InvalidBus {
                node: destination,
                bus,
            });
        }
        if source == destination {
            return Err(Error::GraphCycle);
        }

        self.connections
            .retain(|c| c.source != source && !(c.destination == destination && c.bus == bus));
        self.connections.push(Connection {
            source,
            destination,
            bus,
        });
        trace!(%source, %destination, bus, "connected");
        self.dirty = true;
        Ok(())
    }

    /// Break every connection into `node`.
    pub fn disconnect_node_input(&mut self, node: NodeId) {
        let before = self.connections.len();
        self.connections.retain(|c| c.destination != node);
        self.dirty |= before != self.connections.len();
    }

    /// Break the connection into one input bus of `node`.
    pub fn disconnect_node_input_bus(&mut self, node: NodeId, bus: usize) {
        let before = self.connections.len();
        self.connections
            .retain(|c| !(c.destination == node && c.bus == bus));
        self.dirty |= before != self.connections.len();
    }

    /// Break the connection out of `node`.
    pub fn disconnect_node_output(&mut self, node: NodeId) {
        let before = self.connections.len();
        self.connections.retain(|c| c.source != node);
        self.dirty |= before != self.connections.len();
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn role(&self, id: NodeId) -> Option<NodeRole> {
        self.nodes.get(&id).map(|entry| entry.role)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// The node feeding `destination` on `bus`, if any.
    pub fn input_of(&self, destination: NodeId, bus: usize) -> Option<NodeId> {
        self.connections
            .iter()
            .find(|c| c.destination == destination && c.bus == bus)
            .map(|c| c.source)
    }

    /// Current connections by role, sorted for stable comparison.
    pub fn wiring(&self) -> Vec<Wire> {
        let mut wires: Vec<Wire> = self
            .connections
            .iter()
            .filter_map(|c| {
                Some(Wire::new(
                    self.role(c.source)?,
                    self.role(c.destination)?,
                    c.bus,
                ))
            })
            .collect();
        wires.sort_by_key(|w| (w.destination.to_string(), w.bus, w.source.to_string()));
        wires
    }

    /// Edits made since the last commit.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Publish the current topology to the renderer.
    pub fn commit(&mut self) -> Result<()> {
        let order = self.sorted()?;
        let index: HashMap<NodeId, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut steps = Vec::with_capacity(order.len());
        let mut output = None;
        for (i, id) in order.iter().enumerate() {
            let entry = &self.nodes[id];
            if entry.role == NodeRole::Output {
                output = Some(i);
            }
            let inputs = self
                .connections
                .iter()
                .filter(|c| c.destination == *id)
                .map(|c| (c.bus, index[&c.source]))
                .collect();
            steps.push(PlanStep {
                id: *id,
                node: Arc::clone(&entry.cell),
                inputs,
            });
        }

        let plan = RenderPlan {
            steps,
            output,
            max_frames: self.max_frames,
        };
        let old = self.plan.swap(Arc::new(plan));
        self.retired.push(old);
        self.collect_garbage();
        self.dirty = false;
        debug!(
            nodes = order.len(),
            connections = self.connections.len(),
            "graph committed"
        );
        Ok(())
    }

    /// Drop replaced plans the renderer no longer references.
    pub fn collect_garbage(&mut self) {
        self.retired.retain(|plan| Arc::strong_count(plan) > 1);
    }

    /// Replaced plans still held by the renderer.
    pub fn retired_plans(&self) -> usize {
        self.retired.len()
    }

    fn sorted(&self) -> Result<Vec<NodeId>> {
        let mut indegree: BTreeMap<NodeId, usize> =
            self.nodes.keys().map(|id| (*id, 0)).collect();
        for c in &self.connections {
            if let Some(degree) = indegree.get_mut(&c.destination) {
                *degree += 1;
            }
        }

        let mut ready: VecDeque<NodeId> = indegree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_front() {
            order.push(id);
            for c in self.connections.iter().filter(|c| c.source == id) {
                if let Some(degree) = indegree.get_mut(&c.destination) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(c.destination);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(Error::GraphCycle);
        }
        Ok(order)
    }
}
