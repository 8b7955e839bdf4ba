//! Vertex Cache
//!
//! Owning store for the halo: snapshots of remote vertices (and mirrors of
//! local ones at distance 0) this PE may interact with. Every live slot is
//! simultaneously reachable through a hash index (the segmented map), its
//! partition's doubly-linked list, and optionally the local-neighbor list of
//! slots adjacent to at least one locally owned vertex. Free slots sit on a
//! pool list that reuses the partition linkage. A recency list is maintained
//! alongside, but nothing is ever evicted: running out of slots is fatal.
//!

use crate::derivative::Derivative;
use crate::seg_map::*;
use crate::slab::{Handle, NIL};
use crate::util::*;
use crate::vertex::*;

/// distance-from-local markers kept per slot
pub const DIST_LOCAL: u8 = 0;
pub const DIST_NEIGHBOR: u8 = 1;
pub const DIST_UNKNOWN: u8 = 0xff;

/// hash-index value: the slot handle, deduplicated by identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CachedVert(pub Handle);

impl MapValue for CachedVert {
    fn matches(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

#[derive(Debug, Clone)]
struct CacheSlot {
    vert: Vertex,
    part: Partition,
    // partition list linkage, reused as pool linkage while free
    part_prev: Handle,
    part_next: Handle,
    ln_prev: Handle,
    ln_next: Handle,
    lru_prev: Handle,
    lru_next: Handle,
}

impl Default for CacheSlot {
    fn default() -> Self {
        Self {
            vert: Vertex::new(0),
            part: 0,
            part_prev: NIL,
            part_next: NIL,
            ln_prev: NIL,
            ln_next: NIL,
            lru_prev: NIL,
            lru_next: NIL,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CachePerf {
    pub nhits: u64,
    pub nmisses: u64,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct VertexCache {
    pe: PeId,
    #[derivative(Debug = "ignore")]
    slots: Vec<CacheSlot>,
    pool_head: Handle,
    pool_len: usize,
    #[derivative(Debug = "ignore")]
    partitions: Vec<Handle>,
    local_neighbors_head: Handle,
    lru_head: Handle,
    lru_tail: Handle,
    #[derivative(Debug = "ignore")]
    cache_map: SegMap<CachedVert>,
    #[derivative(Debug = "ignore")]
    dist_from_local_vert: Vec<u8>,
    n_cached: usize,
    pub perf: CachePerf,
}

impl VertexCache {
    pub fn new(pe: PeId, npartitions: usize, n_preallocs: usize, n_map_segs: usize) -> Self {
        assert!(n_preallocs > 0);
        let mut slots = vec![CacheSlot::default(); n_preallocs];
        for (index, slot) in slots.iter_mut().enumerate() {
            slot.part_prev = if index == 0 { NIL } else { (index - 1) as Handle };
            slot.part_next = if index + 1 == n_preallocs { NIL } else { (index + 1) as Handle };
        }
        Self {
            pe,
            slots,
            pool_head: 0,
            pool_len: n_preallocs,
            partitions: vec![NIL; npartitions],
            local_neighbors_head: NIL,
            lru_head: NIL,
            lru_tail: NIL,
            cache_map: SegMap::new("vertex cache index", pe, n_map_segs, 1),
            dist_from_local_vert: vec![DIST_UNKNOWN; n_preallocs],
            n_cached: 0,
            perf: CachePerf::default(),
        }
    }

    /// look a vertex up by id, counting the hit or miss and refreshing the
    /// recency list on a hit
    pub fn lookup(&mut self, id: VertexId) -> Option<Handle> {
        let found = self.cache_map.linearize(id).and_then(|vals| {
            if vals.is_empty() {
                None
            } else {
                assert_eq!(vals.len(), 1, "one cache slot per vertex id");
                Some(vals.get(0).0)
            }
        });
        match found {
            Some(handle) => {
                self.perf.nhits += 1;
                self.lru_unlink(handle);
                self.lru_push_front(handle);
                Some(handle)
            }
            None => {
                self.perf.nmisses += 1;
                None
            }
        }
    }

    /// read-only probe that leaves the counters and the recency list alone
    pub fn peek(&self, id: VertexId) -> Option<Handle> {
        self.cache_map.linearize(id).and_then(|vals| {
            if vals.is_empty() {
                None
            } else {
                Some(vals.get(0).0)
            }
        })
    }

    pub fn add(&mut self, vert: &Vertex, part: Partition) -> Handle {
        let handle = self.pool_head;
        if handle == NIL {
            eprintln!(
                "ERROR: PE {} exhausted {} vertex cache slots",
                self.pe,
                self.slots.len()
            );
            panic!("vertex cache exhausted on PE {}", self.pe);
        }
        self.pool_head = self.slots[handle as usize].part_next;
        if self.pool_head != NIL {
            self.slots[self.pool_head as usize].part_prev = NIL;
        }
        self.pool_len -= 1;

        let slot = &mut self.slots[handle as usize];
        slot.vert = *vert;
        slot.part = part;
        slot.ln_prev = NIL;
        slot.ln_next = NIL;
        slot.lru_prev = NIL;
        slot.lru_next = NIL;

        // head of the partition list
        let head = self.partitions[part as usize];
        self.slots[handle as usize].part_prev = NIL;
        self.slots[handle as usize].part_next = head;
        if head != NIL {
            self.slots[head as usize].part_prev = handle;
        }
        self.partitions[part as usize] = handle;

        self.lru_push_front(handle);
        self.cache_map.add(vert.id, CachedVert(handle));
        self.dist_from_local_vert[handle as usize] = DIST_UNKNOWN;
        self.n_cached += 1;
        handle
    }

    pub fn delete(&mut self, id: VertexId) {
        let handle = self.lookup(id).expect("deleting a vertex that is not cached");
        self.cache_map.remove(id, CachedVert(handle));
        self.part_unlink(handle);
        if self.local_neighbor_list_contains(handle) {
            self.ln_unlink(handle);
        }
        self.lru_unlink(handle);

        // back onto the pool through the partition linkage
        if self.pool_head != NIL {
            self.slots[self.pool_head as usize].part_prev = handle;
        }
        let slot = &mut self.slots[handle as usize];
        slot.part_next = self.pool_head;
        slot.part_prev = NIL;
        slot.ln_prev = NIL;
        slot.ln_next = NIL;
        slot.lru_prev = NIL;
        slot.lru_next = NIL;
        self.pool_head = handle;
        self.pool_len += 1;
        self.dist_from_local_vert[handle as usize] = DIST_UNKNOWN;
        self.n_cached -= 1;
    }

    /// overwrite the payload of a slot whose partition did not change
    pub fn update(&mut self, handle: Handle, vert: &Vertex) {
        debug_assert_eq!(self.slots[handle as usize].vert.id, vert.id);
        self.slots[handle as usize].vert = *vert;
    }

    pub fn vert(&self, handle: Handle) -> &Vertex {
        &self.slots[handle as usize].vert
    }

    pub fn part_of(&self, handle: Handle) -> Partition {
        self.slots[handle as usize].part
    }

    pub fn dist(&self, handle: Handle) -> u8 {
        self.dist_from_local_vert[handle as usize]
    }

    pub fn set_dist(&mut self, handle: Handle, dist: u8) {
        self.dist_from_local_vert[handle as usize] = dist;
    }

    fn local_neighbor_list_contains(&self, handle: Handle) -> bool {
        let slot = &self.slots[handle as usize];
        slot.ln_prev != NIL || slot.ln_next != NIL || self.local_neighbors_head == handle
    }

    /// idempotent: a slot already on the list stays where it is
    pub fn add_to_local_neighbor_list(&mut self, handle: Handle) {
        if self.local_neighbor_list_contains(handle) {
            return;
        }
        let head = self.local_neighbors_head;
        if head != NIL {
            self.slots[head as usize].ln_prev = handle;
        }
        self.slots[handle as usize].ln_next = head;
        self.slots[handle as usize].ln_prev = NIL;
        self.local_neighbors_head = handle;
    }

    /// idempotent: absent slots are left alone
    pub fn remove_from_local_neighbor_list(&mut self, handle: Handle) {
        if self.local_neighbor_list_contains(handle) {
            self.ln_unlink(handle);
            self.slots[handle as usize].ln_prev = NIL;
            self.slots[handle as usize].ln_next = NIL;
        }
    }

    fn part_unlink(&mut self, handle: Handle) {
        let (prev, next) = {
            let slot = &self.slots[handle as usize];
            (slot.part_prev, slot.part_next)
        };
        let part = self.slots[handle as usize].part as usize;
        if prev == NIL {
            debug_assert_eq!(self.partitions[part], handle);
            self.partitions[part] = next;
        } else {
            self.slots[prev as usize].part_next = next;
        }
        if next != NIL {
            self.slots[next as usize].part_prev = prev;
        }
    }

    fn ln_unlink(&mut self, handle: Handle) {
        let (prev, next) = {
            let slot = &self.slots[handle as usize];
            (slot.ln_prev, slot.ln_next)
        };
        if prev == NIL {
            debug_assert_eq!(self.local_neighbors_head, handle);
            self.local_neighbors_head = next;
        } else {
            self.slots[prev as usize].ln_next = next;
        }
        if next != NIL {
            self.slots[next as usize].ln_prev = prev;
        }
    }

    fn lru_unlink(&mut self, handle: Handle) {
        let (prev, next) = {
            let slot = &self.slots[handle as usize];
            (slot.lru_prev, slot.lru_next)
        };
        if prev == NIL {
            if self.lru_head != handle {
                return; // not on the list
            }
            self.lru_head = next;
        } else {
            self.slots[prev as usize].lru_next = next;
        }
        if next == NIL {
            self.lru_tail = prev;
        } else {
            self.slots[next as usize].lru_prev = prev;
        }
        self.slots[handle as usize].lru_prev = NIL;
        self.slots[handle as usize].lru_next = NIL;
    }

    fn lru_push_front(&mut self, handle: Handle) {
        let head = self.lru_head;
        self.slots[handle as usize].lru_prev = NIL;
        self.slots[handle as usize].lru_next = head;
        if head != NIL {
            self.slots[head as usize].lru_prev = handle;
        } else {
            self.lru_tail = handle;
        }
        self.lru_head = handle;
    }

    pub fn partition_iter(&self, part: Partition) -> CacheListIter<'_> {
        CacheListIter {
            cache: self,
            cursor: self.partitions[part as usize],
            list: ListKind::Partition,
        }
    }

    pub fn local_neighbors_iter(&self) -> CacheListIter<'_> {
        CacheListIter {
            cache: self,
            cursor: self.local_neighbors_head,
            list: ListKind::LocalNeighbors,
        }
    }

    pub fn n_cached(&self) -> usize {
        self.n_cached
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn pool_available(&self) -> usize {
        self.pool_len
    }

    pub fn mem_used(&self) -> usize {
        self.slots.len() * std::mem::size_of::<CacheSlot>()
            + self.partitions.len() * std::mem::size_of::<Handle>()
            + self.dist_from_local_vert.len()
    }

    /// walk every index and check the exactly-one-place invariants
    pub fn validate(&self) {
        let mut pool = 0;
        let mut cursor = self.pool_head;
        while cursor != NIL {
            pool += 1;
            cursor = self.slots[cursor as usize].part_next;
        }
        assert_eq!(pool, self.pool_len);

        let mut live = 0;
        for part in 0..self.partitions.len() {
            let mut cursor = self.partitions[part];
            while cursor != NIL {
                let slot = &self.slots[cursor as usize];
                assert_eq!(slot.part as usize, part, "slot filed under the wrong partition");
                assert_eq!(
                    self.cache_map.count_values(slot.vert.id),
                    1,
                    "live slot missing from the hash index"
                );
                live += 1;
                cursor = slot.part_next;
            }
        }
        assert_eq!(live, self.n_cached);
        assert_eq!(
            self.pool_len + live,
            self.slots.len(),
            "every slot is either pooled or on exactly one partition list"
        );

        let mut lru = 0;
        let mut cursor = self.lru_head;
        while cursor != NIL {
            lru += 1;
            cursor = self.slots[cursor as usize].lru_next;
        }
        assert_eq!(lru, self.n_cached, "recency list covers exactly the live slots");

        let mut cursor = self.local_neighbors_head;
        while cursor != NIL {
            assert!(
                self.cache_map.count_values(self.slots[cursor as usize].vert.id) == 1,
                "local-neighbor entry is not a live slot"
            );
            cursor = self.slots[cursor as usize].ln_next;
        }
    }
}

enum ListKind {
    Partition,
    LocalNeighbors,
}

pub struct CacheListIter<'a> {
    cache: &'a VertexCache,
    cursor: Handle,
    list: ListKind,
}

impl<'a> Iterator for CacheListIter<'a> {
    type Item = Handle;

    fn next(&mut self) -> Option<Handle> {
        if self.cursor == NIL {
            return None;
        }
        let current = self.cursor;
        let slot = &self.cache.slots[current as usize];
        self.cursor = match self.list {
            ListKind::Partition => slot.part_next,
            ListKind::LocalNeighbors => slot.ln_next,
        };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;

    fn vert(pe: PeId, offset: usize, part: Partition) -> Vertex {
        let mut vert = Vertex::new(construct_vertex_id(pe, offset));
        vert.partition = part;
        vert
    }

    #[test]
    fn vertex_cache_add_lookup_delete_1() {
        // cargo test vertex_cache_add_lookup_delete_1 -- --nocapture
        let mut cache = VertexCache::new(0, 64, 8, 16);
        let v = vert(1, 0, 5);
        let handle = cache.add(&v, 5);
        assert_eq!(cache.n_cached(), 1);
        assert_eq!(cache.pool_available(), 7);
        let found = cache.lookup(v.id).unwrap();
        assert_eq!(found, handle);
        assert_eq!(cache.vert(found).id, v.id);
        assert_eq!(cache.perf.nhits, 1);
        assert!(cache.lookup(construct_vertex_id(1, 1)).is_none());
        assert_eq!(cache.perf.nmisses, 1);
        cache.validate();
        cache.delete(v.id);
        assert_eq!(cache.n_cached(), 0);
        assert_eq!(cache.pool_available(), 8, "delete restores the pool exactly");
        assert!(cache.peek(v.id).is_none());
        cache.validate();
    }

    #[test]
    fn vertex_cache_partition_lists_1() {
        // cargo test vertex_cache_partition_lists_1 -- --nocapture
        let mut cache = VertexCache::new(0, 16, 8, 16);
        for offset in 0..4 {
            cache.add(&vert(1, offset, 3), 3);
        }
        cache.add(&vert(1, 9, 7), 7);
        assert_eq!(cache.partition_iter(3).count(), 4);
        assert_eq!(cache.partition_iter(7).count(), 1);
        assert_eq!(cache.partition_iter(0).count(), 0);
        // removing the last element of a singleton list resets its head
        cache.delete(construct_vertex_id(1, 9));
        assert_eq!(cache.partition_iter(7).count(), 0);
        cache.validate();
    }

    #[test]
    fn vertex_cache_local_neighbor_list_idempotent_1() {
        // cargo test vertex_cache_local_neighbor_list_idempotent_1 -- --nocapture
        let mut cache = VertexCache::new(0, 16, 8, 16);
        let a = cache.add(&vert(1, 0, 0), 0);
        let b = cache.add(&vert(1, 1, 0), 0);
        cache.add_to_local_neighbor_list(a);
        cache.add_to_local_neighbor_list(a);
        cache.add_to_local_neighbor_list(b);
        assert_eq!(cache.local_neighbors_iter().count(), 2);
        cache.remove_from_local_neighbor_list(a);
        cache.remove_from_local_neighbor_list(a);
        assert_eq!(cache.local_neighbors_iter().count(), 1);
        assert_eq!(cache.local_neighbors_iter().next(), Some(b));
        cache.validate();
    }

    #[test]
    #[should_panic(expected = "vertex cache")]
    fn vertex_cache_overflow_is_fatal_1() {
        // cargo test vertex_cache_overflow_is_fatal_1 -- --nocapture
        let mut cache = VertexCache::new(0, 4, 16, 16);
        for offset in 0..17 {
            cache.add(&vert(1, offset, 0), 0);
        }
    }

    #[test]
    fn vertex_cache_randomized_invariants_1() {
        // cargo test vertex_cache_randomized_invariants_1 -- --nocapture
        let mut rng = Xoshiro256StarStar::seed_from_u64(42);
        let mut cache = VertexCache::new(0, 32, 64, 32);
        let mut live: Vec<VertexId> = vec![];
        for _ in 0..2000 {
            if live.len() < 48 && (live.is_empty() || rng.gen_bool(0.6)) {
                let offset = rng.gen_range(0..1_000_000);
                let id = construct_vertex_id(1, offset);
                if cache.peek(id).is_none() {
                    let part = rng.gen_range(0..32) as Partition;
                    let handle = cache.add(&vert(1, offset, part), part);
                    if rng.gen_bool(0.3) {
                        cache.add_to_local_neighbor_list(handle);
                    }
                    live.push(id);
                }
            } else {
                let index = rng.gen_range(0..live.len());
                let id = live.swap_remove(index);
                cache.delete(id);
            }
        }
        cache.validate();
        assert_eq!(cache.n_cached(), live.len());
    }
}
