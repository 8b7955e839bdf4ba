//! Irregular Matrix
//!
//! Per-local-vertex adjacency rows: dynamically sized arrays of packed
//! (neighbor, kind) words carved out of a word arena. Rows start at capacity
//! 2, double up to 128 entries and then grow linearly by 16; deletion swaps
//! the last entry into the hole. A row never shrinks.
//!

use crate::arena::*;
use crate::util::*;

#[derive(Debug, Clone, Copy)]
struct EdgeRow {
    block: WordBlock,
    len: u32,
    capacity: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MatrixUsage {
    pub words_used: usize,
    pub words_capacity: usize,
    pub max_row_len: usize,
    pub max_row_index: usize,
}

pub struct IrrMatrix {
    rows: Vec<Option<EdgeRow>>,
    pool: Arena,
}

fn grown_capacity(capacity: u32) -> u32 {
    if capacity == 0 {
        2
    } else if capacity <= 128 {
        capacity * 2
    } else {
        capacity + 16
    }
}

impl IrrMatrix {
    pub fn new(pe: PeId, nvertices: usize, pool_words: usize) -> Self {
        Self {
            rows: vec![None; nvertices],
            pool: Arena::new("edge row", pe, pool_words),
        }
    }

    /// record, rewrite or (with `NoEdge`) delete the edge from `i` to `j`
    pub fn set(&mut self, i: LocalOffset, j: VertexId, kind: EdgeKind) {
        let Some(row) = self.rows[i] else {
            if kind == EdgeKind::NoEdge {
                return;
            }
            let block = self.pool.alloc(2);
            self.pool.words_mut(block, 1)[0] = EdgeInfo::new(j, kind).0;
            self.rows[i] = Some(EdgeRow {
                block,
                len: 1,
                capacity: 2,
            });
            return;
        };

        let words = self.pool.words_mut(row.block, row.len as usize);
        let found = words.iter().position(|word| EdgeInfo(*word).vertex() == j);
        if let Some(index) = found {
            if kind == EdgeKind::NoEdge {
                words[index] = words[row.len as usize - 1];
                self.rows[i].as_mut().unwrap().len -= 1;
            } else {
                words[index] = EdgeInfo::new(j, kind).0;
            }
            return;
        }
        if kind == EdgeKind::NoEdge {
            return;
        }

        let mut row = row;
        if row.len == row.capacity {
            let new_capacity = grown_capacity(row.capacity);
            let new_block = self.pool.alloc(new_capacity as usize);
            self.pool.copy(new_block, row.block, row.len as usize);
            self.pool.free(row.block);
            row.block = new_block;
            row.capacity = new_capacity;
        }
        self.pool.words_mut(row.block, row.len as usize + 1)[row.len as usize] =
            EdgeInfo::new(j, kind).0;
        row.len += 1;
        self.rows[i] = Some(row);
    }

    pub fn get(&self, i: LocalOffset, j: VertexId) -> EdgeKind {
        let Some(row) = self.rows[i] else {
            return EdgeKind::NoEdge;
        };
        self.pool
            .words(row.block, row.len as usize)
            .iter()
            .map(|word| EdgeInfo(*word))
            .find(|info| info.vertex() == j)
            .map_or(EdgeKind::NoEdge, |info| info.kind())
    }

    pub fn row_len(&self, i: LocalOffset) -> usize {
        self.rows[i].map_or(0, |row| row.len as usize)
    }

    pub fn edges_iter(&self, i: LocalOffset) -> impl Iterator<Item = EdgeInfo> + '_ {
        let words = match self.rows[i] {
            Some(row) => self.pool.words(row.block, row.len as usize),
            None => &[],
        };
        words.iter().map(|word| EdgeInfo(*word))
    }

    /// copy row `i` into the two output vectors
    pub fn linearize(
        &self,
        i: LocalOffset,
        out_vals: &mut Vec<VertexId>,
        out_kinds: &mut Vec<EdgeKind>,
    ) {
        out_vals.clear();
        out_kinds.clear();
        for info in self.edges_iter(i) {
            out_vals.push(info.vertex());
            out_kinds.push(info.kind());
        }
    }

    pub fn nvertices(&self) -> usize {
        self.rows.len()
    }

    pub fn usage(&self) -> MatrixUsage {
        let mut usage = MatrixUsage {
            words_capacity: self.pool.capacity_words(),
            ..MatrixUsage::default()
        };
        for (index, row) in self.rows.iter().enumerate() {
            let Some(row) = row else { continue };
            usage.words_used += row.len as usize;
            if row.len as usize > usage.max_row_len {
                usage.max_row_len = row.len as usize;
                usage.max_row_index = index;
            }
        }
        usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn irr_matrix_set_get_last_write_wins_1() {
        // cargo test irr_matrix_set_get_last_write_wins_1 -- --nocapture
        let mut matrix = IrrMatrix::new(0, 4, 1024);
        let j = construct_vertex_id(1, 7);
        assert_eq!(matrix.get(0, j), EdgeKind::NoEdge);
        matrix.set(0, j, EdgeKind::DirectedOut);
        assert_eq!(matrix.get(0, j), EdgeKind::DirectedOut);
        matrix.set(0, j, EdgeKind::Bidirectional);
        assert_eq!(matrix.get(0, j), EdgeKind::Bidirectional);
        matrix.set(0, j, EdgeKind::NoEdge);
        assert_eq!(matrix.get(0, j), EdgeKind::NoEdge);
        // deleting again is a no-op, as is deleting from an untouched row
        matrix.set(0, j, EdgeKind::NoEdge);
        matrix.set(3, j, EdgeKind::NoEdge);
        assert_eq!(matrix.row_len(0), 0);
        assert_eq!(matrix.row_len(3), 0);
    }

    #[test_case(1; "single edge")]
    #[test_case(2; "exactly first capacity")]
    #[test_case(3; "first growth to 4")]
    #[test_case(129; "into linear growth")]
    #[test_case(200; "well past linear threshold")]
    fn irr_matrix_growth_policy(n_edges: usize) {
        // cargo test irr_matrix_growth_policy -- --nocapture
        let mut matrix = IrrMatrix::new(0, 1, 1 << 14);
        for offset in 0..n_edges {
            matrix.set(0, construct_vertex_id(1, offset), EdgeKind::DirectedOut);
        }
        assert_eq!(matrix.row_len(0), n_edges);
        for offset in 0..n_edges {
            assert_eq!(
                matrix.get(0, construct_vertex_id(1, offset)),
                EdgeKind::DirectedOut
            );
        }
    }

    #[test]
    fn irr_matrix_swap_delete_keeps_rest_1() {
        // cargo test irr_matrix_swap_delete_keeps_rest_1 -- --nocapture
        let mut matrix = IrrMatrix::new(0, 1, 1024);
        let ids: Vec<VertexId> = (0..5).map(|offset| construct_vertex_id(1, offset)).collect();
        for id in &ids {
            matrix.set(0, *id, EdgeKind::Bidirectional);
        }
        matrix.set(0, ids[1], EdgeKind::NoEdge);
        assert_eq!(matrix.row_len(0), 4);
        for (index, id) in ids.iter().enumerate() {
            let expect = if index == 1 {
                EdgeKind::NoEdge
            } else {
                EdgeKind::Bidirectional
            };
            assert_eq!(matrix.get(0, *id), expect);
        }
        let mut vals = vec![];
        let mut kinds = vec![];
        matrix.linearize(0, &mut vals, &mut kinds);
        assert_eq!(vals.len(), 4);
        assert!(kinds.iter().all(|kind| *kind == EdgeKind::Bidirectional));
    }

    #[test]
    fn irr_matrix_interleaved_set_delete_1() {
        // cargo test irr_matrix_interleaved_set_delete_1 -- --nocapture
        // get() always reflects the last surviving write
        let mut matrix = IrrMatrix::new(0, 1, 1024);
        let j = construct_vertex_id(2, 0);
        let script = [
            (EdgeKind::DirectedIn, EdgeKind::DirectedIn),
            (EdgeKind::NoEdge, EdgeKind::NoEdge),
            (EdgeKind::Bidirectional, EdgeKind::Bidirectional),
            (EdgeKind::DirectedOut, EdgeKind::DirectedOut),
            (EdgeKind::NoEdge, EdgeKind::NoEdge),
        ];
        for (write, expect) in script {
            matrix.set(0, j, write);
            assert_eq!(matrix.get(0, j), expect);
        }
    }
}
