//! Render side of the graph.
//!
//! The frontend publishes an immutable [`RenderPlan`] through `ArcSwap`. The
//! renderer loads it once per callback and walks the steps in topological order.
//! Nodes are reached with `try_lock`; a node the control thread happens to hold
//! is skipped for that cycle rather than waited on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::node::{NodeId, RenderNode};

pub(crate) type NodeCell = Arc<Mutex<Box<dyn RenderNode>>>;

pub(crate) struct PlanStep {
    #[allow(dead_code)]
    pub(crate) id: NodeId,
    pub(crate) node: NodeCell,
    /// `(input bus, index of the source step)`.
    pub(crate) inputs: Vec<(usize, usize)>,
}

pub(crate) struct RenderPlan {
    pub(crate) steps: Vec<PlanStep>,
    pub(crate) output: Option<usize>,
    pub(crate) max_frames: usize,
}

impl RenderPlan {
    pub(crate) fn empty(max_frames: usize) -> Self {
        Self {
            steps: Vec::new(),
            output: None,
            max_frames,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RenderStats {
    cycles: AtomicU64,
    skipped: AtomicU64,
}

/// Pulls audio through the published plan. Cheap to clone; hand one to each
/// output driver.
#[derive(Clone)]
pub struct GraphRenderer {
    plan: Arc<ArcSwap<RenderPlan>>,
    stats: Arc<RenderStats>,
    channels: usize,
}

impl GraphRenderer {
    pub(crate) fn new(
        plan: Arc<ArcSwap<RenderPlan>>,
        stats: Arc<RenderStats>,
        channels: usize,
    ) -> Self {
        Self {
            plan,
            stats,
            channels,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Fill `out` (interleaved, `channels()` wide) with the next frames.
    ///
    /// Never blocks and never allocates.
    pub fn render(&self, out: &mut [f32]) {
        let plan = self.plan.load();
        let channels = self.channels;
        let total = out.len() / channels;
        let block = plan.max_frames.max(1);

        let mut offset = 0;
        while offset < total {
            let frames = (total - offset).min(block);
            let chunk = &mut out[offset * channels..(offset + frames) * channels];
            if !self.render_block(&plan, frames, chunk) {
                chunk.fill(0.0);
            }
            offset += frames;
        }
        out[total * channels..].fill(0.0);
    }

    fn render_block(&self, plan: &RenderPlan, frames: usize, out: &mut [f32]) -> bool {
        for step in &plan.steps {
            let Some(mut node) = step.node.try_lock() else {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            };

            for bus in 0..node.input_bus_count() {
                if let Some(input) = node.input_mut(bus) {
                    input.clear(frames);
                }
            }
            for &(bus, source) in &step.inputs {
                let Some(source) = plan.steps[source].node.try_lock() else {
                    self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                    continue;
                };
                if let Some(input) = node.input_mut(bus) {
                    input.mix_from(source.output(), 1.0);
                }
            }
            node.process(frames);
        }

        let Some(output) = plan.output else {
            return false;
        };
        let Some(node) = plan.steps[output].node.try_lock() else {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        let samples = node.output().samples();
        let n = samples.len().min(out.len());
        out[..n].copy_from_slice(&samples[..n]);
        out[n..].fill(0.0);
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Blocks rendered to the output node so far.
    pub fn cycles(&self) -> u64 {
        self.stats.cycles.load(Ordering::Relaxed)
    }

    /// Node visits skipped because the control thread held the node.
    pub fn skipped(&self) -> u64 {
        self.stats.skipped.load(Ordering::Relaxed)
    }
}
