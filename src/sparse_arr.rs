//! Sparse Array
//!
//! Map from a bounded integer key range (partitions) to sets of PE ids. The
//! key range is chunked into fixed-size segments that are materialized from a
//! preallocated pool only once a key in them is touched; each in-segment
//! offset holds an AVL tree of PE ids plus a size counter. Keys are never
//! stored, they are encoded as (segment, offset).
//!

use crate::avl;
use crate::avl::AvlNode;
use crate::slab::*;
use crate::util::*;

pub const SPARSE_ARR_SEGMENT_SIZE: usize = 1024;

pub struct SparseArrSeg {
    roots: Box<[Handle; SPARSE_ARR_SEGMENT_SIZE]>,
    sizes: Box<[u32; SPARSE_ARR_SEGMENT_SIZE]>,
}

impl Default for SparseArrSeg {
    fn default() -> Self {
        Self {
            roots: Box::new([NIL; SPARSE_ARR_SEGMENT_SIZE]),
            sizes: Box::new([0; SPARSE_ARR_SEGMENT_SIZE]),
        }
    }
}

pub struct SparseArr {
    // per segment index: handle into the segment pool, NIL when untouched
    segs: Vec<Handle>,
    seg_pool: Slab<SparseArrSeg>,
    nodes: Slab<AvlNode>,
    capacity: usize,
}

impl SparseArr {
    pub fn new(pe: PeId, capacity: usize, prealloc_segs: usize, node_pool: usize) -> Self {
        let nsegs = capacity.div_ceil(SPARSE_ARR_SEGMENT_SIZE);
        Self {
            segs: vec![NIL; nsegs],
            seg_pool: Slab::new("sparse array segment", pe, prealloc_segs.max(1)),
            nodes: Slab::new("sparse array node", pe, node_pool.max(1)),
            capacity,
        }
    }

    fn locate(&self, i: usize) -> (usize, usize) {
        assert!(i < self.capacity, "key {} outside capacity {}", i, self.capacity);
        (i / SPARSE_ARR_SEGMENT_SIZE, i % SPARSE_ARR_SEGMENT_SIZE)
    }

    pub fn insert(&mut self, i: usize, j: u64) {
        let (seg_index, offset) = self.locate(i);
        if self.segs[seg_index] == NIL {
            self.segs[seg_index] = self.seg_pool.alloc(SparseArrSeg::default());
        }
        let seg = self.segs[seg_index];
        let root = self.seg_pool[seg].roots[offset];
        let (new_root, grew) = avl::insert(&mut self.nodes, root, j);
        let s = &mut self.seg_pool[seg];
        s.roots[offset] = new_root;
        if grew {
            s.sizes[offset] += 1;
        }
    }

    pub fn remove(&mut self, i: usize, j: u64) {
        let (seg_index, offset) = self.locate(i);
        if self.segs[seg_index] == NIL {
            return;
        }
        let seg = self.segs[seg_index];
        let root = self.seg_pool[seg].roots[offset];
        let (new_root, shrank) = avl::remove(&mut self.nodes, root, j);
        let s = &mut self.seg_pool[seg];
        s.roots[offset] = new_root;
        if shrank {
            s.sizes[offset] -= 1;
        }
    }

    pub fn contains(&self, i: usize, j: u64) -> bool {
        let (seg_index, offset) = self.locate(i);
        if self.segs[seg_index] == NIL {
            return false;
        }
        avl::contains(&self.nodes, self.seg_pool[self.segs[seg_index]].roots[offset], j)
    }

    pub fn row_size(&self, i: usize) -> usize {
        let (seg_index, offset) = self.locate(i);
        if self.segs[seg_index] == NIL {
            return 0;
        }
        self.seg_pool[self.segs[seg_index]].sizes[offset] as usize
    }

    /// fill `out` with the row's values in ascending order, returning the count
    pub fn linearize_row(&self, i: usize, out: &mut Vec<u64>) -> usize {
        out.clear();
        let (seg_index, offset) = self.locate(i);
        if self.segs[seg_index] == NIL {
            return 0;
        }
        avl::collect_into(&self.nodes, self.seg_pool[self.segs[seg_index]].roots[offset], out);
        out.len()
    }

    /// drop the whole row
    pub fn remove_row(&mut self, i: usize) {
        let (seg_index, offset) = self.locate(i);
        if self.segs[seg_index] == NIL {
            return;
        }
        let seg = self.segs[seg_index];
        let root = self.seg_pool[seg].roots[offset];
        avl::free_subtree(&mut self.nodes, root);
        let s = &mut self.seg_pool[seg];
        s.roots[offset] = NIL;
        s.sizes[offset] = 0;
    }

    /// erase `j` from every row it appears in; used when a PE withdraws from
    /// all partitions at once
    pub fn remove_value(&mut self, j: u64) {
        for seg_index in 0..self.segs.len() {
            let seg = self.segs[seg_index];
            if seg == NIL {
                continue;
            }
            for offset in 0..SPARSE_ARR_SEGMENT_SIZE {
                let root = self.seg_pool[seg].roots[offset];
                if root == NIL {
                    continue;
                }
                let (new_root, shrank) = avl::remove(&mut self.nodes, root, j);
                let s = &mut self.seg_pool[seg];
                s.roots[offset] = new_root;
                if shrank {
                    s.sizes[offset] -= 1;
                }
            }
        }
    }

    pub fn segments_in_use(&self) -> usize {
        self.seg_pool.len()
    }

    /// check that every size counter matches its tree's node count
    pub fn validate(&self) {
        for seg in self.segs.iter().copied().filter(|seg| *seg != NIL) {
            let s = &self.seg_pool[seg];
            for offset in 0..SPARSE_ARR_SEGMENT_SIZE {
                assert_eq!(
                    avl::node_count(&self.nodes, s.roots[offset]),
                    s.sizes[offset] as usize,
                    "size counter out of sync at offset {}",
                    offset
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_arr_insert_remove_contains_1() {
        // cargo test sparse_arr_insert_remove_contains_1 -- --nocapture
        let mut arr = SparseArr::new(0, 4096, 8, 256);
        arr.insert(10, 3);
        arr.insert(10, 5);
        arr.insert(2000, 3);
        assert!(arr.contains(10, 3));
        assert!(arr.contains(2000, 3));
        assert!(!arr.contains(10, 4));
        assert_eq!(arr.row_size(10), 2);
        assert_eq!(arr.segments_in_use(), 2, "two segments materialized");
        arr.remove(10, 3);
        assert!(!arr.contains(10, 3));
        assert_eq!(arr.row_size(10), 1);
        arr.validate();
    }

    #[test]
    fn sparse_arr_remove_value_everywhere_1() {
        // cargo test sparse_arr_remove_value_everywhere_1 -- --nocapture
        let mut arr = SparseArr::new(0, 8192, 8, 1024);
        for i in (0..8192).step_by(37) {
            arr.insert(i, 7);
            arr.insert(i, 11);
        }
        arr.remove_value(7);
        for i in (0..8192).step_by(37) {
            assert!(!arr.contains(i, 7));
            assert!(arr.contains(i, 11));
            assert_eq!(arr.row_size(i), 1);
        }
        arr.validate();
    }

    #[test]
    fn sparse_arr_linearize_row_1() {
        // cargo test sparse_arr_linearize_row_1 -- --nocapture
        let mut arr = SparseArr::new(0, 1024, 4, 64);
        for j in [9u64, 1, 5, 3, 7] {
            arr.insert(100, j);
        }
        let mut row = vec![];
        assert_eq!(arr.linearize_row(100, &mut row), 5);
        assert_eq!(row, vec![1, 3, 5, 7, 9]);
        assert_eq!(arr.linearize_row(101, &mut row), 0);
        assert!(row.is_empty());
    }

    #[test]
    fn sparse_arr_remove_row_1() {
        // cargo test sparse_arr_remove_row_1 -- --nocapture
        let mut arr = SparseArr::new(0, 1024, 4, 64);
        for j in 0..20u64 {
            arr.insert(50, j);
        }
        arr.remove_row(50);
        assert_eq!(arr.row_size(50), 0);
        assert!(!arr.contains(50, 0));
        arr.validate();
        // the node pool got everything back
        for j in 0..20u64 {
            arr.insert(51, j);
        }
        assert_eq!(arr.row_size(51), 20);
    }
}
