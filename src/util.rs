//! Shared Types
//!
//! Identifier types, the packed edge representation and small helpers used by
//! every module of the runtime.
//!

use crate::serde::{Deserialize, Serialize};

cfg_if::cfg_if! {
    if #[cfg(feature="u16_partition")] {
        /// partition identifier; narrowed to save memory in the cache and the export tables
        pub type Partition = u16;
    } else {
        /// partition identifier
        pub type Partition = u32;
    }
}

/// one process of the distributed job
pub type PeId = usize;
/// global vertex identifier, owner PE and local offset packed together
pub type VertexId = u64;
/// offset of a vertex inside its owner's local store
pub type LocalOffset = usize;
/// iteration counter of the driver
pub type IterationId = u64;

/// bits of a vertex id holding the owner's local offset
pub const VERTEX_ID_OFFSET_BITS: u32 = 32;
/// bits holding the owning PE; the top two bits of the word are reserved for
/// the edge kind when a neighbor id is packed into an [`EdgeInfo`]
pub const VERTEX_ID_PE_BITS: u32 = 30;
/// largest representable vertex id
pub const MAX_VERTEX_ID: VertexId = (1u64 << (VERTEX_ID_OFFSET_BITS + VERTEX_ID_PE_BITS)) - 1;

pub fn construct_vertex_id(pe: PeId, offset: LocalOffset) -> VertexId {
    debug_assert!((pe as u64) < (1u64 << VERTEX_ID_PE_BITS));
    debug_assert!((offset as u64) < (1u64 << VERTEX_ID_OFFSET_BITS));
    ((pe as u64) << VERTEX_ID_OFFSET_BITS) | offset as u64
}

pub fn vertex_id_owner(id: VertexId) -> PeId {
    (id >> VERTEX_ID_OFFSET_BITS) as PeId
}

pub fn vertex_id_offset(id: VertexId) -> LocalOffset {
    (id & ((1u64 << VERTEX_ID_OFFSET_BITS) - 1)) as LocalOffset
}

/// the four-valued relation a vertex may have with a neighbor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum EdgeKind {
    #[default]
    NoEdge = 0,
    DirectedIn = 1,
    DirectedOut = 2,
    Bidirectional = 3,
}

impl EdgeKind {
    pub fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::NoEdge,
            1 => Self::DirectedIn,
            2 => Self::DirectedOut,
            3 => Self::Bidirectional,
            _ => unreachable!("edge kind is a two-bit field"),
        }
    }

    /// the same relation seen from the other endpoint
    pub fn invert(self) -> Self {
        match self {
            Self::DirectedIn => Self::DirectedOut,
            Self::DirectedOut => Self::DirectedIn,
            other => other,
        }
    }
}

const EDGE_INFO_KIND_SHIFT: u32 = 62;
const EDGE_INFO_VERTEX_MASK: u64 = (1u64 << EDGE_INFO_KIND_SHIFT) - 1;

/// a neighbor id and an edge kind packed into a single word; the neighbor id
/// occupies bits 0..=61 and the kind bits 62..=63
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeInfo(pub u64);

impl EdgeInfo {
    pub fn new(neighbor: VertexId, kind: EdgeKind) -> Self {
        debug_assert!(neighbor <= MAX_VERTEX_ID);
        Self(((kind as u64) << EDGE_INFO_KIND_SHIFT) | neighbor)
    }

    pub fn vertex(self) -> VertexId {
        self.0 & EDGE_INFO_VERTEX_MASK
    }

    pub fn kind(self) -> EdgeKind {
        EdgeKind::from_bits((self.0 >> EDGE_INFO_KIND_SHIFT) as u8)
    }
}

/// dense bit set over the PEs of the job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeSet {
    bits: Vec<u64>,
    n_pes: usize,
}

impl PeSet {
    pub fn new(n_pes: usize) -> Self {
        Self {
            bits: vec![0; n_pes.div_ceil(64)],
            n_pes,
        }
    }

    pub fn insert(&mut self, pe: PeId) {
        assert!(pe < self.n_pes, "PE {} out of range (job has {})", pe, self.n_pes);
        self.bits[pe / 64] |= 1u64 << (pe % 64);
    }

    pub fn remove(&mut self, pe: PeId) {
        assert!(pe < self.n_pes);
        self.bits[pe / 64] &= !(1u64 << (pe % 64));
    }

    pub fn contains(&self, pe: PeId) -> bool {
        pe < self.n_pes && self.bits[pe / 64] & (1u64 << (pe % 64)) != 0
    }

    pub fn clear_all(&mut self) {
        self.bits.fill(0);
    }

    pub fn union_with(&mut self, other: &PeSet) {
        assert_eq!(self.n_pes, other.n_pes);
        for (word, other_word) in self.bits.iter_mut().zip(other.bits.iter()) {
            *word |= other_word;
        }
    }

    pub fn len(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = PeId> + '_ {
        (0..self.n_pes).filter(move |pe| self.contains(*pe))
    }
}

/// read a usize from the environment, falling back to `default` when unset
pub fn env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(text) => text
            .parse()
            .unwrap_or_else(|_| panic!("invalid value for {}: {}", name, text)),
        Err(_) => default,
    }
}
