//! Simulation Callbacks
//!
//! The one value a simulation hands to the runtime at init: partitioning,
//! the edge predicate, the per-vertex update, coupling and termination,
//! grouped behind a single trait so the driver is generic over the callback
//! set instead of juggling function pointers.
//!

use crate::transport::CouplingEnvelope;
use crate::util::*;
use crate::vertex::*;

/// one neighbor as seen by `update_metadata`: a read-only snapshot plus the
/// edge kind from the updated vertex's perspective
pub struct NeighborView<'a> {
    pub vert: &'a Vertex,
    pub kind: EdgeKind,
}

/// side channel offered to `update_metadata`: coupling partnerships and
/// vertex-addressed messages, applied by the driver once the local sweep ends
pub struct UpdateCtx<'a> {
    pub iter: IterationId,
    pub my_pe: PeId,
    couple_with: &'a mut PeSet,
    outbox: &'a mut Vec<CouplingEnvelope>,
}

impl<'a> UpdateCtx<'a> {
    pub fn new(
        iter: IterationId,
        my_pe: PeId,
        couple_with: &'a mut PeSet,
        outbox: &'a mut Vec<CouplingEnvelope>,
    ) -> Self {
        Self {
            iter,
            my_pe,
            couple_with,
            outbox,
        }
    }

    /// enter a coupling partnership with `pe`; partnerships persist until the
    /// job ends
    pub fn couple_with(&mut self, pe: PeId) {
        self.couple_with.insert(pe);
    }

    /// queue a message for the mailbox of `dst` on its owning PE
    pub fn send_to(&mut self, dst: VertexId, payload: Vertex) {
        self.outbox.push(CouplingEnvelope { dst, payload });
    }
}

/// what `should_terminate` gets to look at
pub struct TerminationView {
    pub iter: IterationId,
    pub my_pe: PeId,
    pub n_local: usize,
    /// this PE's own coupled metric, as just published
    pub coupled_metric: f64,
    /// the latest metric fetched from every coupling partner
    pub partner_metrics: Vec<(PeId, f64)>,
}

pub trait VertexSimulation {
    /// assign a vertex to its partition from its current state
    fn partition_of(&self, vert: &Vertex) -> Partition;

    /// partitions whose vertices might interact with one in `partition`;
    /// results are cached by the driver, so this must be a pure function of
    /// its argument
    fn might_interact(&self, partition: Partition, out: &mut Vec<Partition>);

    /// the edge `a` should carry toward `b`, from `a`'s perspective
    fn should_have_edge(&self, a: &Vertex, b: &Vertex) -> EdgeKind;

    /// per-vertex update, run once per iteration on every local vertex
    fn update_metadata(&mut self, vert: &mut Vertex, neighbors: &[NeighborView], ctx: &mut UpdateCtx);

    /// per-iteration metric published to coupling partners
    fn update_coupled_val(&mut self, _iter: IterationId, _n_local: usize) -> f64 {
        0.0
    }

    /// local vote to stop; the job exits once every PE has voted yes
    fn should_terminate(&mut self, view: &TerminationView) -> bool;
}
