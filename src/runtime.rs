//! Halo Runtime
//!
//! The per-PE iteration driver. Each iteration: recompute the partitions of
//! the local vertices and publish membership transitions to the distributed
//! bitmap, expand the interest set, discover producers whose rows advanced,
//! pull their vertices into the cache, rebuild the edge index against the
//! refreshed halo, run the user update on every local vertex, drain coupling
//! messages, and evaluate termination. Only the membership publish, producer
//! discovery, vertex pull and message poll touch remote memory; everything
//! else is PE-local.
//!

use crate::buffered_msgs::*;
use crate::dist_bitmap::*;
use crate::irr_matrix::*;
use crate::seg_map::*;
use crate::serde::{Deserialize, Serialize};
use crate::simulation::*;
use crate::slab::Handle;
use crate::sparse_arr::*;
use crate::transport::*;
use crate::util::*;
use crate::vertex::*;
use crate::vertex_cache::*;
use hashbrown::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HaloConfig {
    /// number of partitions the simulation assigns vertices to
    #[serde(default = "halo_default_configs::npartitions")]
    pub npartitions: usize,
    /// symmetric export capacity; every PE reserves room for this many vertices
    #[serde(default = "halo_default_configs::max_local_vertices")]
    pub max_local_vertices: usize,
    /// cache slots preallocated (`HVR_VEC_CACHE_PREALLOCS` overrides)
    #[serde(default = "halo_default_configs::cache_preallocs")]
    pub cache_preallocs: usize,
    /// segments preallocated for the cache index (`HVR_VERT_CACHE_SEGS` overrides)
    #[serde(default = "halo_default_configs::cache_map_segs")]
    pub cache_map_segs: usize,
    /// segments preallocated for the reverse edge index
    #[serde(default = "halo_default_configs::edge_map_segs")]
    pub edge_map_segs: usize,
    /// first spill capacity of a map entry's value list
    #[serde(default = "halo_default_configs::map_init_val_capacity")]
    pub map_init_val_capacity: usize,
    /// bytes reserved for bitmap row subcopies (`HVR_DIST_BITVEC_POOL_SIZE` overrides)
    #[serde(default = "halo_default_configs::bitvec_pool_bytes")]
    pub bitvec_pool_bytes: usize,
    /// message nodes preallocated for the coupling mailboxes
    #[serde(default = "halo_default_configs::msg_pool_nodes")]
    pub msg_pool_nodes: usize,
    /// words reserved for edge rows
    #[serde(default = "halo_default_configs::matrix_pool_words")]
    pub matrix_pool_words: usize,
    #[serde(default = "halo_default_configs::sparse_arr_prealloc_segs")]
    pub sparse_arr_prealloc_segs: usize,
    #[serde(default = "halo_default_configs::sparse_arr_node_pool")]
    pub sparse_arr_node_pool: usize,
    /// wall-clock budget in milliseconds, 0 for unlimited; checked at
    /// iteration boundaries only
    #[serde(default = "halo_default_configs::max_elapsed_ms")]
    pub max_elapsed_ms: u64,
    /// iteration budget, 0 for unlimited
    #[serde(default = "halo_default_configs::max_iterations")]
    pub max_iterations: u64,
}

impl Default for HaloConfig {
    fn default() -> Self {
        serde_json::from_value(json!({})).unwrap()
    }
}

pub mod halo_default_configs {
    pub fn npartitions() -> usize {
        1024
    }
    pub fn max_local_vertices() -> usize {
        1024
    }
    pub fn cache_preallocs() -> usize {
        1024
    }
    pub fn cache_map_segs() -> usize {
        768
    }
    pub fn edge_map_segs() -> usize {
        768
    }
    pub fn map_init_val_capacity() -> usize {
        16
    }
    pub fn bitvec_pool_bytes() -> usize {
        1024 * 1024
    }
    pub fn msg_pool_nodes() -> usize {
        1024
    }
    pub fn matrix_pool_words() -> usize {
        1 << 16
    }
    pub fn sparse_arr_prealloc_segs() -> usize {
        32
    }
    pub fn sparse_arr_node_pool() -> usize {
        4096
    }
    pub fn max_elapsed_ms() -> u64 {
        0
    }
    pub fn max_iterations() -> u64 {
        0
    }
}

impl HaloConfig {
    /// environment wins over config-file values
    pub fn with_env_overrides(mut self) -> Self {
        self.bitvec_pool_bytes = env_usize("HVR_DIST_BITVEC_POOL_SIZE", self.bitvec_pool_bytes);
        self.cache_preallocs = env_usize("HVR_VEC_CACHE_PREALLOCS", self.cache_preallocs);
        self.cache_map_segs = env_usize("HVR_VERT_CACHE_SEGS", self.cache_map_segs);
        self
    }

    /// symmetric heap words one PE needs for a job of `n_pes`
    pub fn heap_words_needed(&self, n_pes: usize) -> usize {
        let rows_per_pe = self.npartitions.div_ceil(n_pes);
        let bitmap = rows_per_pe * n_pes.div_ceil(64) + rows_per_pe;
        let exports = 2 * self.npartitions + self.max_local_vertices * VERTEX_WORDS;
        bitmap + exports + 2 + 64
    }
}

/// interest-cache value: an index into the driver's list-of-lists, one entry
/// per partition ever queried
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct InteractList(u32);

impl MapValue for InteractList {
    fn matches(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterOutcome {
    Progress,
    Terminated,
    TimeExceeded,
    IterationLimit,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RunStats {
    pub iterations: u64,
    pub pulled_vertices: u64,
    pub edge_updates: u64,
    pub msgs_polled: u64,
    pub pull_time_us: u64,
    pub edge_time_us: u64,
    pub update_time_us: u64,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: IterOutcome,
    pub iterations: u64,
    pub elapsed_ms: u64,
    pub stats: RunStats,
    pub cache_perf: CachePerf,
}

pub struct HaloRuntime<T: Transport, S: VertexSimulation> {
    transport: Arc<T>,
    sim: S,
    config: HaloConfig,

    verts: LocalStore,
    cache: VertexCache,
    matrix: IrrMatrix,
    // cached id -> edges back to local vertices; drives eviction cleanup and
    // the local-neighbor list
    rev_edges: SegMap<EdgeInfo>,
    msgs: BufferedMsgs,
    bitmap: DistBitmap<T>,
    // partition -> producers last observed in its bitmap row
    producers: SparseArr,

    interact_map: SegMap<InteractList>,
    interact_lists: Vec<Vec<Partition>>,

    owned: Vec<bool>,
    owned_count: Vec<u32>,
    interest_flags: Vec<bool>,
    interest_list: Vec<usize>,
    last_seen_seq: HashMap<usize, u64>,

    export_index_addr: SymmAddr,
    export_verts_addr: SymmAddr,
    term_addr: SymmAddr,
    metric_addr: SymmAddr,

    couple_set: PeSet,
    outbox: Vec<CouplingEnvelope>,
    terminated_self: bool,

    row_snap: Option<RowSnapshot>,
    export_index: Vec<u64>,
    export_cursors: Vec<u64>,
    export_words: Vec<u64>,
    scratch_words: Vec<u64>,
    scratch_members: Vec<u64>,
    pull_queue: Vec<(PeId, usize)>,
    scratch_handles: Vec<Handle>,
    scratch_ids: HashSet<VertexId>,
    scratch_stale: Vec<VertexId>,
    scratch_edges: Vec<EdgeInfo>,
    scratch_row_vals: Vec<VertexId>,
    scratch_row_kinds: Vec<EdgeKind>,

    iter: IterationId,
    started: Instant,
    pub stats: RunStats,
}

impl<T: Transport, S: VertexSimulation> HaloRuntime<T, S> {
    /// collective constructor; every PE must call with the same config
    pub fn new(transport: Arc<T>, sim: S, config: HaloConfig, verts: Vec<Vertex>) -> Self {
        let config = config.with_env_overrides();
        let pe = transport.my_pe();
        let npartitions = config.npartitions;
        assert!(npartitions <= Partition::MAX as usize + 1, "partition type too narrow");
        assert!(
            verts.len() <= config.max_local_vertices,
            "PE {} holds {} vertices but the export region fits {}",
            pe,
            verts.len(),
            config.max_local_vertices
        );

        let mut bitmap = DistBitmap::new(
            npartitions,
            transport.n_pes(),
            config.bitvec_pool_bytes,
            transport.clone(),
        );
        let export_index_addr = transport.symm_alloc(2 * npartitions);
        let export_verts_addr = transport.symm_alloc(config.max_local_vertices * VERTEX_WORDS);
        let term_addr = transport.symm_alloc(1);
        let metric_addr = transport.symm_alloc(1);

        let n_local = verts.len();
        let row_snap = Some(bitmap.snapshot_new());
        let runtime = Self {
            sim,
            verts: LocalStore::new(pe, verts),
            cache: VertexCache::new(pe, npartitions, config.cache_preallocs, config.cache_map_segs),
            matrix: IrrMatrix::new(pe, n_local, config.matrix_pool_words),
            rev_edges: SegMap::new(
                "reverse edge index",
                pe,
                config.edge_map_segs,
                config.map_init_val_capacity,
            ),
            msgs: BufferedMsgs::new(pe, n_local, config.msg_pool_nodes),
            bitmap,
            producers: SparseArr::new(
                pe,
                npartitions,
                config.sparse_arr_prealloc_segs,
                config.sparse_arr_node_pool,
            ),
            interact_map: SegMap::new("interest cache", pe, 64, 1),
            interact_lists: Vec::new(),
            owned: vec![false; npartitions],
            owned_count: vec![0; npartitions],
            interest_flags: vec![false; npartitions],
            interest_list: Vec::new(),
            last_seen_seq: HashMap::new(),
            export_index_addr,
            export_verts_addr,
            term_addr,
            metric_addr,
            couple_set: PeSet::new(transport.n_pes()),
            outbox: Vec::new(),
            terminated_self: false,
            row_snap,
            export_index: Vec::new(),
            export_cursors: Vec::new(),
            export_words: vec![0; config.max_local_vertices * VERTEX_WORDS],
            scratch_words: Vec::new(),
            scratch_members: Vec::new(),
            pull_queue: Vec::new(),
            scratch_handles: Vec::new(),
            scratch_ids: HashSet::new(),
            scratch_stale: Vec::new(),
            scratch_edges: Vec::new(),
            scratch_row_vals: Vec::new(),
            scratch_row_kinds: Vec::new(),
            iter: 0,
            started: Instant::now(),
            stats: RunStats::default(),
            config,
            transport,
        };
        runtime.transport.barrier_all();
        runtime
    }

    pub fn my_pe(&self) -> PeId {
        self.transport.my_pe()
    }

    pub fn n_pes(&self) -> usize {
        self.transport.n_pes()
    }

    pub fn iter_count(&self) -> IterationId {
        self.iter
    }

    pub fn config(&self) -> &HaloConfig {
        &self.config
    }

    pub fn cache(&self) -> &VertexCache {
        &self.cache
    }

    pub fn matrix(&self) -> &IrrMatrix {
        &self.matrix
    }

    pub fn msgs_mut(&mut self) -> &mut BufferedMsgs {
        &mut self.msgs
    }

    pub fn local_vertex(&self, offset: LocalOffset) -> &Vertex {
        self.verts.get(offset)
    }

    pub fn coupled_metric(&self, pe: PeId) -> f64 {
        f64::from_bits(self.transport.atomic_fetch(self.metric_addr, pe))
    }

    fn interact_handle(&mut self, partition: Partition) -> usize {
        if let Some(vals) = self.interact_map.linearize(partition as u64) {
            if !vals.is_empty() {
                return vals.get(0).0 as usize;
            }
        }
        let mut out = Vec::new();
        self.sim.might_interact(partition, &mut out);
        let handle = self.interact_lists.len();
        self.interact_lists.push(out);
        self.interact_map.add(partition as u64, InteractList(handle as u32));
        handle
    }

    /// step 1: refresh partitions, publish membership transitions, mirror the
    /// local vertices into the cache and rewrite the export region
    fn recompute_partitions(&mut self) {
        for p in 0..self.config.npartitions {
            self.owned_count[p] = 0;
        }
        for offset in 0..self.verts.len() {
            let partition = self.sim.partition_of(self.verts.get(offset));
            assert!((partition as usize) < self.config.npartitions);
            self.verts.get_mut(offset).partition = partition;
            self.owned_count[partition as usize] += 1;
        }
        let my_pe = self.my_pe();
        for p in 0..self.config.npartitions {
            let occupied = self.owned_count[p] > 0;
            if occupied && !self.owned[p] {
                self.bitmap.set(p, my_pe);
            } else if !occupied && self.owned[p] {
                self.bitmap.clear(p, my_pe);
            }
            self.owned[p] = occupied;
        }

        // distance-0 mirrors so candidate enumeration sees local and remote
        // vertices uniformly
        for offset in 0..self.verts.len() {
            let vert = *self.verts.get(offset);
            match self.cache.peek(vert.id) {
                Some(handle) if self.cache.part_of(handle) == vert.partition => {
                    self.cache.update(handle, &vert);
                }
                Some(_) => {
                    self.evict_cached(vert.id);
                    let handle = self.cache.add(&vert, vert.partition);
                    self.cache.set_dist(handle, DIST_LOCAL);
                }
                None => {
                    let handle = self.cache.add(&vert, vert.partition);
                    self.cache.set_dist(handle, DIST_LOCAL);
                }
            }
        }

        self.publish_exports();
    }

    fn publish_exports(&mut self) {
        let npartitions = self.config.npartitions;
        self.export_index.clear();
        self.export_index.resize(2 * npartitions, 0);
        for offset in 0..self.verts.len() {
            let p = self.verts.get(offset).partition as usize;
            self.export_index[2 * p + 1] += 1;
        }
        self.export_cursors.clear();
        self.export_cursors.resize(npartitions, 0);
        let mut cursor = 0u64;
        for p in 0..npartitions {
            self.export_index[2 * p] = cursor;
            self.export_cursors[p] = cursor;
            cursor += self.export_index[2 * p + 1];
        }
        for offset in 0..self.verts.len() {
            let vert = *self.verts.get(offset);
            let p = vert.partition as usize;
            let slot = self.export_cursors[p] as usize;
            vert.encode(&mut self.export_words[slot * VERTEX_WORDS..(slot + 1) * VERTEX_WORDS]);
            self.export_cursors[p] += 1;
        }
        let my_pe = self.my_pe();
        self.transport
            .put_bulk(&self.export_index, self.export_index_addr, my_pe);
        let used = self.verts.len() * VERTEX_WORDS;
        self.transport
            .put_bulk(&self.export_words[..used], self.export_verts_addr, my_pe);
    }

    /// step 2: interest = union of might_interact over the owned partitions
    fn expand_interest(&mut self) {
        for &p in &self.interest_list {
            self.interest_flags[p] = false;
        }
        self.interest_list.clear();
        for p in 0..self.config.npartitions {
            if !self.owned[p] {
                continue;
            }
            let handle = self.interact_handle(p as Partition);
            for qi in 0..self.interact_lists[handle].len() {
                let q = self.interact_lists[handle][qi] as usize;
                assert!(q < self.config.npartitions);
                if !self.interest_flags[q] {
                    self.interest_flags[q] = true;
                    self.interest_list.push(q);
                }
            }
        }
    }

    /// steps 3 and 4: snapshot the PE-set row of every interesting partition,
    /// diff membership, and pull from producers whose row advanced
    fn pull_changed_partitions(&mut self) {
        let begun = Instant::now();
        let my_pe = self.my_pe();
        let n_pes = self.n_pes();
        self.pull_queue.clear();
        let mut snap = self.row_snap.take().unwrap();
        for pi in 0..self.interest_list.len() {
            let p = self.interest_list[pi];
            self.bitmap.copy_locally(p, &mut snap);
            let advanced = match self.last_seen_seq.get(&p) {
                Some(last) => snap.seq_no > *last,
                None => true,
            };
            self.producers.linearize_row(p, &mut self.scratch_members);
            for pe in 0..n_pes {
                let now = self.bitmap.snapshot_contains(pe, &snap);
                let before = self.scratch_members.contains(&(pe as u64));
                if now && !before {
                    self.producers.insert(p, pe as u64);
                } else if !now && before {
                    self.producers.remove(p, pe as u64);
                    self.evict_partition_of(pe, p);
                }
                if now && pe != my_pe && advanced {
                    self.pull_queue.push((pe, p));
                }
            }
            self.last_seen_seq.insert(p, snap.seq_no);
        }
        self.row_snap = Some(snap);

        for qi in 0..self.pull_queue.len() {
            let (pe, p) = self.pull_queue[qi];
            self.pull_partition(pe, p);
        }
        self.stats.pull_time_us += begun.elapsed().as_micros() as u64;
    }

    /// drop every cached vertex of `pe` filed under partition `p`
    fn evict_partition_of(&mut self, pe: PeId, p: usize) {
        self.scratch_stale.clear();
        for handle in self.cache.partition_iter(p as Partition) {
            let vert = self.cache.vert(handle);
            if vert.owner() == pe {
                self.scratch_stale.push(vert.id);
            }
        }
        for k in 0..self.scratch_stale.len() {
            let id = self.scratch_stale[k];
            self.evict_cached(id);
        }
    }

    /// remove a cached vertex along with every edge that references it
    fn evict_cached(&mut self, id: VertexId) {
        self.scratch_edges.clear();
        if let Some(vals) = self.rev_edges.linearize(id) {
            self.scratch_edges.extend(vals.iter());
        }
        for k in 0..self.scratch_edges.len() {
            let info = self.scratch_edges[k];
            let local_offset = vertex_id_offset(info.vertex());
            self.matrix.set(local_offset, id, EdgeKind::NoEdge);
            self.rev_edges.remove(id, info);
        }
        self.cache.delete(id);
    }

    fn pull_partition(&mut self, pe: PeId, p: usize) {
        let mut index = [0u64; 2];
        self.transport
            .get_bulk(&mut index, self.export_index_addr.offset(2 * p), pe);
        let (first, count) = (index[0] as usize, index[1] as usize);
        if first + count > self.config.max_local_vertices {
            // the producer rewrote its index mid-read; its next membership
            // write will bring us back for a clean copy
            return;
        }
        self.scratch_words.clear();
        self.scratch_words.resize(count * VERTEX_WORDS, 0);
        self.transport.get_bulk(
            &mut self.scratch_words,
            self.export_verts_addr.offset(first * VERTEX_WORDS),
            pe,
        );

        self.scratch_ids.clear();
        for k in 0..count {
            let vert = Vertex::decode(&self.scratch_words[k * VERTEX_WORDS..(k + 1) * VERTEX_WORDS]);
            if vert.owner() == pe {
                self.scratch_ids.insert(vert.id);
            }
        }

        // evict ids this producer no longer exports under p
        self.scratch_stale.clear();
        for handle in self.cache.partition_iter(p as Partition) {
            let vert = self.cache.vert(handle);
            if vert.owner() == pe && !self.scratch_ids.contains(&vert.id) {
                self.scratch_stale.push(vert.id);
            }
        }
        for k in 0..self.scratch_stale.len() {
            let id = self.scratch_stale[k];
            self.evict_cached(id);
        }

        // insert or refresh the pulled snapshots; words from a producer that
        // is mid-rewrite can decode to a foreign owner and are dropped
        for k in 0..count {
            let vert = Vertex::decode(&self.scratch_words[k * VERTEX_WORDS..(k + 1) * VERTEX_WORDS]);
            if vert.owner() != pe || (vert.partition as usize) >= self.config.npartitions {
                continue;
            }
            match self.cache.peek(vert.id) {
                Some(handle) if self.cache.part_of(handle) == vert.partition => {
                    self.cache.update(handle, &vert);
                }
                Some(_) => {
                    self.evict_cached(vert.id);
                    self.cache.add(&vert, vert.partition);
                }
                None => {
                    self.cache.add(&vert, vert.partition);
                }
            }
            self.stats.pulled_vertices += 1;
        }
    }

    /// step 5: evaluate the edge predicate against the refreshed halo and
    /// reconcile the matrix, the reverse index and the local-neighbor list
    fn rebuild_edges(&mut self) {
        let begun = Instant::now();
        for offset in 0..self.verts.len() {
            let vert = *self.verts.get(offset);

            // old row, for pruning edges to vanished candidates
            self.matrix
                .linearize(offset, &mut self.scratch_row_vals, &mut self.scratch_row_kinds);

            self.scratch_handles.clear();
            let handle = self.interact_handle(vert.partition);
            for qi in 0..self.interact_lists[handle].len() {
                let q = self.interact_lists[handle][qi];
                self.scratch_handles.extend(self.cache.partition_iter(q));
            }

            self.scratch_ids.clear();
            for k in 0..self.scratch_handles.len() {
                let candidate = self.scratch_handles[k];
                let other = *self.cache.vert(candidate);
                if other.id == vert.id {
                    continue;
                }
                self.scratch_ids.insert(other.id);
                let kind = self.sim.should_have_edge(&vert, &other);
                let old = self.matrix.get(offset, other.id);
                if kind != old {
                    self.matrix.set(offset, other.id, kind);
                    if old != EdgeKind::NoEdge {
                        self.rev_edges.remove(other.id, EdgeInfo::new(vert.id, old.invert()));
                    }
                    if kind != EdgeKind::NoEdge {
                        self.rev_edges.add(other.id, EdgeInfo::new(vert.id, kind.invert()));
                    }
                    self.stats.edge_updates += 1;
                }
                self.refresh_local_neighbor(candidate, other.id);
            }

            for k in 0..self.scratch_row_vals.len() {
                let old_id = self.scratch_row_vals[k];
                if self.scratch_ids.contains(&old_id) {
                    continue;
                }
                self.matrix.set(offset, old_id, EdgeKind::NoEdge);
                self.rev_edges
                    .remove(old_id, EdgeInfo::new(vert.id, self.scratch_row_kinds[k].invert()));
                self.stats.edge_updates += 1;
                if let Some(stale_handle) = self.cache.peek(old_id) {
                    self.refresh_local_neighbor(stale_handle, old_id);
                }
            }
        }
        self.stats.edge_time_us += begun.elapsed().as_micros() as u64;
    }

    fn refresh_local_neighbor(&mut self, handle: Handle, id: VertexId) {
        if self.rev_edges.count_values(id) > 0 {
            self.cache.add_to_local_neighbor_list(handle);
            if self.cache.dist(handle) != DIST_LOCAL {
                self.cache.set_dist(handle, DIST_NEIGHBOR);
            }
        } else {
            self.cache.remove_from_local_neighbor_list(handle);
            if self.cache.dist(handle) != DIST_LOCAL {
                self.cache.set_dist(handle, DIST_UNKNOWN);
            }
        }
    }

    /// step 6: user update over every local vertex, then flush coupling
    /// messages and publish the coupled metric
    fn run_user_updates(&mut self) {
        let begun = Instant::now();
        let my_pe = self.my_pe();
        for offset in 0..self.verts.len() {
            self.scratch_edges.clear();
            self.scratch_edges.extend(self.matrix.edges_iter(offset));
            self.scratch_handles.clear();
            for k in 0..self.scratch_edges.len() {
                let neighbor = self.scratch_edges[k].vertex();
                let handle = self
                    .cache
                    .lookup(neighbor)
                    .expect("edge points at a vertex missing from the cache");
                self.scratch_handles.push(handle);
            }
            let neighbors: Vec<NeighborView> = self
                .scratch_handles
                .iter()
                .zip(self.scratch_edges.iter())
                .map(|(handle, info)| NeighborView {
                    vert: self.cache.vert(*handle),
                    kind: info.kind(),
                })
                .collect();
            let mut ctx = UpdateCtx::new(self.iter, my_pe, &mut self.couple_set, &mut self.outbox);
            self.sim
                .update_metadata(self.verts.get_mut(offset), &neighbors, &mut ctx);
        }
        for envelope in self.outbox.drain(..) {
            self.transport.send_msg(vertex_id_owner(envelope.dst), envelope);
        }
        let metric = self.sim.update_coupled_val(self.iter, self.verts.len());
        self.transport.put_bulk(&[metric.to_bits()], self.metric_addr, my_pe);
        self.stats.update_time_us += begun.elapsed().as_micros() as u64;
    }

    /// drain any coupling messages that arrived after the last iteration;
    /// useful when inspecting mailboxes once the run loop has exited
    pub fn drain_coupling(&mut self) {
        self.poll_coupling();
    }

    /// step 7: drain inbound coupling messages into the per-vertex mailboxes
    fn poll_coupling(&mut self) {
        let my_pe = self.my_pe();
        while let Some(envelope) = self.transport.poll_msg() {
            assert_eq!(
                vertex_id_owner(envelope.dst),
                my_pe,
                "coupling message routed to the wrong PE"
            );
            self.msgs.insert(vertex_id_offset(envelope.dst), &envelope.payload);
            self.stats.msgs_polled += 1;
        }
    }

    fn all_terminated(&self) -> bool {
        (0..self.n_pes()).all(|pe| self.transport.atomic_fetch(self.term_addr, pe) != 0)
    }

    /// run one full iteration; the iteration is the scheduling unit and never
    /// suspends in the middle
    pub fn iterate(&mut self) -> IterOutcome {
        self.recompute_partitions();
        self.expand_interest();
        self.pull_changed_partitions();
        self.rebuild_edges();
        self.run_user_updates();
        self.poll_coupling();

        let my_pe = self.my_pe();
        let view = TerminationView {
            iter: self.iter,
            my_pe,
            n_local: self.verts.len(),
            coupled_metric: self.coupled_metric(my_pe),
            partner_metrics: self
                .couple_set
                .iter()
                .map(|pe| (pe, self.coupled_metric(pe)))
                .collect(),
        };
        if !self.terminated_self && self.sim.should_terminate(&view) {
            self.terminated_self = true;
            self.transport.atomic_or(self.term_addr, 1, my_pe);
        }

        self.iter += 1;
        self.stats.iterations += 1;
        if self.terminated_self && self.all_terminated() {
            IterOutcome::Terminated
        } else {
            IterOutcome::Progress
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// wrap a run up: publish the terminated flag so no peer spins on this
    /// PE, and return the summary
    pub fn finish(&mut self, outcome: IterOutcome) -> RunSummary {
        if !self.terminated_self {
            self.terminated_self = true;
            self.transport.atomic_or(self.term_addr, 1, self.my_pe());
        }
        RunSummary {
            outcome,
            iterations: self.iter,
            elapsed_ms: self.elapsed_ms(),
            stats: self.stats.clone(),
            cache_perf: self.cache.perf,
        }
    }

    /// iterate until global termination or a budget runs out
    pub fn run(&mut self) -> RunSummary {
        let outcome = loop {
            if self.config.max_iterations > 0 && self.iter >= self.config.max_iterations {
                break IterOutcome::IterationLimit;
            }
            if self.config.max_elapsed_ms > 0 && self.elapsed_ms() >= self.config.max_elapsed_ms {
                break IterOutcome::TimeExceeded;
            }
            if let IterOutcome::Terminated = self.iterate() {
                break IterOutcome::Terminated;
            }
        };
        self.finish(outcome)
    }
}
