//! Segmented Map
//!
//! Hash map from vertex ids to short value lists, tuned for the access
//! pattern of the edge and cache indexes: frequent single-value insertion and
//! removal, frequent whole-list reads, no per-operation allocation. Buckets
//! chain fixed-size segments drawn from a preallocated pool; a segment's key
//! array is sorted exactly once, when the segment fills, after which lookups
//! inside it use binary search. Each entry stores a few values inline and
//! spills the rest into a geometrically grown array.
//!

use crate::slab::*;
use crate::util::*;

pub const MAP_SEG_SIZE: usize = 32;
pub const MAP_N_INLINE_VALS: usize = 4;
pub const MAP_BUCKETS: usize = 1024;

/// value-flavor hook: which values count as duplicates of each other
pub trait MapValue: Copy + Default + std::fmt::Debug {
    fn matches(&self, other: &Self) -> bool;
    /// called when an add finds `incoming` already present as `self`
    fn assert_consistent(&self, _incoming: &Self) {}
}

impl MapValue for EdgeInfo {
    fn matches(&self, other: &Self) -> bool {
        self.vertex() == other.vertex()
    }

    fn assert_consistent(&self, incoming: &Self) {
        // re-adding an edge with a different kind is a caller bug
        assert_eq!(
            self.kind(),
            incoming.kind(),
            "edge to {} re-added with a different kind",
            self.vertex()
        );
    }
}

#[derive(Debug, Clone)]
pub struct MapEntry<V: MapValue> {
    key: VertexId,
    len: u32,
    inline_vals: [V; MAP_N_INLINE_VALS],
    ext_vals: Vec<V>,
}

impl<V: MapValue> Default for MapEntry<V> {
    fn default() -> Self {
        Self {
            key: 0,
            len: 0,
            inline_vals: [V::default(); MAP_N_INLINE_VALS],
            ext_vals: Vec::new(),
        }
    }
}

impl<V: MapValue> MapEntry<V> {
    fn value_at(&self, index: usize) -> V {
        if index < MAP_N_INLINE_VALS {
            self.inline_vals[index]
        } else {
            self.ext_vals[index - MAP_N_INLINE_VALS]
        }
    }

    fn set_value_at(&mut self, index: usize, value: V) {
        if index < MAP_N_INLINE_VALS {
            self.inline_vals[index] = value;
        } else {
            self.ext_vals[index - MAP_N_INLINE_VALS] = value;
        }
    }
}

pub struct MapSeg<V: MapValue> {
    nkeys: u32,
    // parallel key array; sorted iff the segment is full
    keys: [VertexId; MAP_SEG_SIZE],
    entries: [MapEntry<V>; MAP_SEG_SIZE],
    next: Handle,
}

impl<V: MapValue> Default for MapSeg<V> {
    fn default() -> Self {
        Self {
            nkeys: 0,
            keys: [0; MAP_SEG_SIZE],
            entries: std::array::from_fn(|_| MapEntry::default()),
            next: NIL,
        }
    }
}

/// a borrowed view of one key's values, inline and spilled parts exposed
/// without copying
pub struct MapValList<'a, V: MapValue> {
    inline: &'a [V],
    ext: &'a [V],
}

impl<'a, V: MapValue> MapValList<'a, V> {
    pub fn len(&self) -> usize {
        self.inline.len() + self.ext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inline.is_empty() && self.ext.is_empty()
    }

    pub fn get(&self, index: usize) -> V {
        if index < self.inline.len() {
            self.inline[index]
        } else {
            self.ext[index - self.inline.len()]
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = V> + '_ {
        self.inline.iter().copied().chain(self.ext.iter().copied())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MapUsage {
    pub segments_in_use: usize,
    pub keys: usize,
    pub values: usize,
    pub spill_capacity: usize,
}

pub struct SegMap<V: MapValue> {
    buckets: Vec<Handle>,
    bucket_tails: Vec<Handle>,
    segs: Slab<MapSeg<V>>,
    init_val_capacity: usize,
}

fn bucket_of(key: VertexId) -> usize {
    (key % MAP_BUCKETS as u64) as usize
}

impl<V: MapValue> SegMap<V> {
    /// `n_segs` segments are preallocated; running out of them is fatal
    pub fn new(name: &'static str, pe: PeId, n_segs: usize, init_val_capacity: usize) -> Self {
        Self {
            buckets: vec![NIL; MAP_BUCKETS],
            bucket_tails: vec![NIL; MAP_BUCKETS],
            segs: Slab::new(name, pe, n_segs),
            init_val_capacity,
        }
    }

    fn find(&self, key: VertexId) -> Option<(Handle, usize)> {
        let mut seg = self.buckets[bucket_of(key)];
        while seg != NIL {
            let s = &self.segs[seg];
            let nkeys = s.nkeys as usize;
            if nkeys == MAP_SEG_SIZE {
                if let Ok(index) = s.keys.binary_search(&key) {
                    return Some((seg, index));
                }
            } else if let Some(index) = s.keys[..nkeys].iter().position(|k| *k == key) {
                return Some((seg, index));
            }
            seg = s.next;
        }
        None
    }

    // append a fresh key to a segment with room, sorting it if it just filled
    fn seg_add(&mut self, seg: Handle, key: VertexId, value: V) {
        let s = &mut self.segs[seg];
        let index = s.nkeys as usize;
        assert!(index < MAP_SEG_SIZE);
        s.keys[index] = key;
        s.entries[index] = MapEntry {
            key,
            len: 1,
            inline_vals: {
                let mut vals = [V::default(); MAP_N_INLINE_VALS];
                vals[0] = value;
                vals
            },
            ext_vals: Vec::new(),
        };
        s.nkeys += 1;
        if s.nkeys as usize == MAP_SEG_SIZE {
            s.entries.sort_unstable_by_key(|entry| entry.key);
            for (slot, entry) in s.keys.iter_mut().zip(s.entries.iter()) {
                *slot = entry.key;
            }
        }
    }

    /// insert `value` under `key`; duplicates (under the flavor's equality)
    /// are dropped. Returns whether a new value was stored.
    pub fn add(&mut self, key: VertexId, value: V) -> bool {
        if let Some((seg, index)) = self.find(key) {
            let init_val_capacity = self.init_val_capacity;
            let entry = &mut self.segs[seg].entries[index];
            let nvals = entry.len as usize;
            for i in 0..nvals {
                let existing = entry.value_at(i);
                if existing.matches(&value) {
                    existing.assert_consistent(&value);
                    return false;
                }
            }
            if nvals < MAP_N_INLINE_VALS {
                entry.inline_vals[nvals] = value;
            } else {
                if entry.ext_vals.len() == entry.ext_vals.capacity() {
                    let new_capacity = if entry.ext_vals.capacity() == 0 {
                        init_val_capacity.max(1)
                    } else {
                        2 * entry.ext_vals.capacity()
                    };
                    entry.ext_vals.reserve_exact(new_capacity - entry.ext_vals.len());
                }
                entry.ext_vals.push(value);
            }
            entry.len += 1;
            return true;
        }

        let bucket = bucket_of(key);
        if self.buckets[bucket] == NIL {
            let seg = self.segs.alloc(MapSeg::default());
            self.seg_add(seg, key, value);
            self.buckets[bucket] = seg;
            self.bucket_tails[bucket] = seg;
        } else {
            let tail = self.bucket_tails[bucket];
            if self.segs[tail].nkeys as usize == MAP_SEG_SIZE {
                let seg = self.segs.alloc(MapSeg::default());
                self.seg_add(seg, key, value);
                debug_assert!(self.segs[tail].next == NIL);
                self.segs[tail].next = seg;
                self.bucket_tails[bucket] = seg;
            } else {
                self.seg_add(tail, key, value);
            }
        }
        true
    }

    /// remove `value` from `key`'s list by swap-with-last; the key itself
    /// stays behind even when its list becomes empty
    pub fn remove(&mut self, key: VertexId, value: V) -> bool {
        let Some((seg, index)) = self.find(key) else {
            return false;
        };
        let entry = &mut self.segs[seg].entries[index];
        let nvals = entry.len as usize;
        let Some(found) = (0..nvals).position(|i| entry.value_at(i).matches(&value)) else {
            return false;
        };
        let last = entry.value_at(nvals - 1);
        entry.set_value_at(found, last);
        if nvals > MAP_N_INLINE_VALS {
            entry.ext_vals.pop();
        }
        entry.len -= 1;
        true
    }

    pub fn has(&self, key: VertexId, value: V) -> bool {
        match self.linearize(key) {
            Some(vals) => vals.iter().any(|v| v.matches(&value)),
            None => false,
        }
    }

    pub fn linearize(&self, key: VertexId) -> Option<MapValList<'_, V>> {
        let (seg, index) = self.find(key)?;
        let entry = &self.segs[seg].entries[index];
        let nvals = entry.len as usize;
        Some(MapValList {
            inline: &entry.inline_vals[..nvals.min(MAP_N_INLINE_VALS)],
            ext: &entry.ext_vals[..nvals.saturating_sub(MAP_N_INLINE_VALS)],
        })
    }

    pub fn count_values(&self, key: VertexId) -> usize {
        self.linearize(key).map_or(0, |vals| vals.len())
    }

    /// return every segment to the pool
    pub fn clear(&mut self) {
        for bucket in 0..MAP_BUCKETS {
            let mut seg = self.buckets[bucket];
            while seg != NIL {
                let next = self.segs[seg].next;
                self.segs.free(seg);
                seg = next;
            }
            self.buckets[bucket] = NIL;
            self.bucket_tails[bucket] = NIL;
        }
    }

    pub fn segments_available(&self) -> usize {
        self.segs.available()
    }

    pub fn usage(&self) -> MapUsage {
        let mut usage = MapUsage::default();
        for bucket in 0..MAP_BUCKETS {
            let mut seg = self.buckets[bucket];
            while seg != NIL {
                let s = &self.segs[seg];
                usage.segments_in_use += 1;
                usage.keys += s.nkeys as usize;
                for entry in &s.entries[..s.nkeys as usize] {
                    usage.values += entry.len as usize;
                    usage.spill_capacity += entry.ext_vals.capacity();
                }
                seg = s.next;
            }
        }
        usage
    }
}

impl SegMap<EdgeInfo> {
    /// edge kind stored under `key` toward `neighbor`, `NoEdge` when absent
    pub fn edge_kind(&self, key: VertexId, neighbor: VertexId) -> EdgeKind {
        match self.linearize(key) {
            Some(vals) => vals
                .iter()
                .find(|info| info.vertex() == neighbor)
                .map_or(EdgeKind::NoEdge, |info| info.kind()),
            None => EdgeKind::NoEdge,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Ident(u64);

    impl MapValue for Ident {
        fn matches(&self, other: &Self) -> bool {
            self.0 == other.0
        }
    }

    #[test]
    fn seg_map_add_remove_contains_1() {
        // cargo test seg_map_add_remove_contains_1 -- --nocapture
        let mut map: SegMap<Ident> = SegMap::new("test map", 0, 16, 4);
        assert!(map.add(42, Ident(1)));
        assert!(!map.add(42, Ident(1)), "duplicate add is a no-op");
        assert_eq!(map.count_values(42), 1);
        assert!(map.add(42, Ident(2)));
        assert!(map.remove(42, Ident(1)));
        assert!(!map.has(42, Ident(1)));
        assert!(map.has(42, Ident(2)));
        assert!(!map.remove(42, Ident(1)), "double remove is a no-op");
        assert_eq!(map.count_values(42), 1);
    }

    #[test]
    fn seg_map_dedup_fanout_1() {
        // cargo test seg_map_dedup_fanout_1 -- --nocapture
        let mut map: SegMap<Ident> = SegMap::new("test map", 0, 16, 4);
        for _ in 0..1000 {
            map.add(7, Ident(99));
        }
        assert_eq!(map.linearize(7).unwrap().len(), 1);
        let mut map: SegMap<Ident> = SegMap::new("test map", 0, 16, 4);
        for v in 0..1000u64 {
            map.add(7, Ident(v));
        }
        let vals = map.linearize(7).unwrap();
        assert_eq!(vals.len(), 1000);
        let mut seen: Vec<u64> = vals.iter().map(|v| v.0).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn seg_map_segment_boundary_1() {
        // cargo test seg_map_segment_boundary_1 -- --nocapture
        // keys congruent mod MAP_BUCKETS all land in one bucket; crossing
        // MAP_SEG_SIZE keys forces a second segment and flips the first one
        // into its sorted state
        let mut map: SegMap<Ident> = SegMap::new("test map", 0, 16, 4);
        let keys: Vec<VertexId> = (0..(MAP_SEG_SIZE + 5) as u64)
            .map(|i| 3 + i * MAP_BUCKETS as u64)
            .rev()
            .collect();
        for key in &keys {
            map.add(*key, Ident(*key));
        }
        assert_eq!(map.usage().segments_in_use, 2);
        for key in &keys {
            assert!(map.has(*key, Ident(*key)), "key {} lost after split", key);
        }
        assert_eq!(map.count_values(9999), 0);
    }

    #[test]
    fn seg_map_spill_growth_1() {
        // cargo test seg_map_spill_growth_1 -- --nocapture
        let mut map: SegMap<Ident> = SegMap::new("test map", 0, 16, 4);
        for v in 0..(MAP_N_INLINE_VALS as u64 + 9) {
            map.add(1, Ident(v));
        }
        // spill starts at the configured initial capacity, then doubles
        let spill = map.usage().spill_capacity;
        assert!(spill == 16, "expected 4 -> 8 -> 16 growth, got {}", spill);
        // swap-with-last removal crosses the inline/spill boundary
        assert!(map.remove(1, Ident(0)));
        assert_eq!(map.count_values(1), MAP_N_INLINE_VALS + 8);
        assert!(!map.has(1, Ident(0)));
    }

    #[test]
    fn seg_map_clear_returns_segments_1() {
        // cargo test seg_map_clear_returns_segments_1 -- --nocapture
        let mut map: SegMap<Ident> = SegMap::new("test map", 0, 8, 4);
        for key in 0..100u64 {
            map.add(key, Ident(key));
        }
        let available = map.segments_available();
        map.clear();
        assert_eq!(map.segments_available(), 8);
        assert!(available < 8);
        assert_eq!(map.count_values(50), 0);
    }

    #[test]
    #[should_panic(expected = "pool exhausted")]
    fn seg_map_pool_exhaustion_is_fatal_1() {
        // cargo test seg_map_pool_exhaustion_is_fatal_1 -- --nocapture
        let mut map: SegMap<Ident> = SegMap::new("test map", 0, 2, 4);
        // same bucket throughout: each MAP_SEG_SIZE keys consume a segment
        for i in 0..3 * MAP_SEG_SIZE as u64 {
            map.add(5 + i * MAP_BUCKETS as u64, Ident(i));
        }
    }

    #[test]
    #[should_panic(expected = "different kind")]
    fn seg_map_edge_kind_disagreement_1() {
        // cargo test seg_map_edge_kind_disagreement_1 -- --nocapture
        let mut map: SegMap<EdgeInfo> = SegMap::new("edges", 0, 4, 4);
        map.add(10, EdgeInfo::new(20, EdgeKind::DirectedOut));
        map.add(10, EdgeInfo::new(20, EdgeKind::Bidirectional));
    }

    #[test]
    fn seg_map_edge_kind_query_1() {
        // cargo test seg_map_edge_kind_query_1 -- --nocapture
        let mut map: SegMap<EdgeInfo> = SegMap::new("edges", 0, 4, 4);
        map.add(10, EdgeInfo::new(20, EdgeKind::DirectedOut));
        map.add(10, EdgeInfo::new(21, EdgeKind::Bidirectional));
        assert_eq!(map.edge_kind(10, 20), EdgeKind::DirectedOut);
        assert_eq!(map.edge_kind(10, 21), EdgeKind::Bidirectional);
        assert_eq!(map.edge_kind(10, 22), EdgeKind::NoEdge);
        assert_eq!(map.edge_kind(11, 20), EdgeKind::NoEdge);
    }
}
