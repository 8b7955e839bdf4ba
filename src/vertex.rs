//! Vertex
//!
//! The simulation's unit of state: a fixed-width feature vector owned by one
//! PE, identified by a packed id, plus the word codec used whenever a vertex
//! crosses a PE boundary (export regions and coupling payloads).
//!

use crate::serde::{Deserialize, Serialize};
use crate::util::*;

/// width of the feature vector carried by every vertex
pub const VERTEX_FEATURES: usize = 8;
/// words a vertex occupies on the wire: id, partition, features
pub const VERTEX_WORDS: usize = 2 + VERTEX_FEATURES;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub id: VertexId,
    /// partition hint, refreshed by the driver from the user's partitioning
    /// function at the start of every iteration
    pub partition: Partition,
    features: [f64; VERTEX_FEATURES],
}

impl Vertex {
    pub fn new(id: VertexId) -> Self {
        assert!(id <= MAX_VERTEX_ID);
        Self {
            id,
            partition: 0,
            features: [0.0; VERTEX_FEATURES],
        }
    }

    pub fn get(&self, feature: usize) -> f64 {
        self.features[feature]
    }

    pub fn set(&mut self, feature: usize, value: f64) {
        self.features[feature] = value;
    }

    pub fn owner(&self) -> PeId {
        vertex_id_owner(self.id)
    }

    pub fn offset(&self) -> LocalOffset {
        vertex_id_offset(self.id)
    }

    pub fn encode(&self, out: &mut [u64]) {
        assert!(out.len() >= VERTEX_WORDS);
        out[0] = self.id;
        out[1] = self.partition as u64;
        for (slot, feature) in out[2..VERTEX_WORDS].iter_mut().zip(self.features.iter()) {
            *slot = feature.to_bits();
        }
    }

    pub fn decode(words: &[u64]) -> Self {
        assert!(words.len() >= VERTEX_WORDS);
        let mut features = [0.0; VERTEX_FEATURES];
        for (feature, word) in features.iter_mut().zip(words[2..VERTEX_WORDS].iter()) {
            *feature = f64::from_bits(*word);
        }
        Self {
            id: words[0],
            partition: words[1] as Partition,
            features,
        }
    }
}

/// the PE-local vertex store; vertices are created at init on their owning PE
/// and live until the job finalizes
pub struct LocalStore {
    verts: Vec<Vertex>,
}

impl LocalStore {
    pub fn new(pe: PeId, verts: Vec<Vertex>) -> Self {
        for (offset, vert) in verts.iter().enumerate() {
            assert_eq!(vert.owner(), pe, "vertex owned by another PE");
            assert_eq!(vert.offset(), offset, "vertex id out of line with its slot");
        }
        Self { verts }
    }

    pub fn len(&self) -> usize {
        self.verts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verts.is_empty()
    }

    pub fn get(&self, offset: LocalOffset) -> &Vertex {
        &self.verts[offset]
    }

    pub fn get_mut(&mut self, offset: LocalOffset) -> &mut Vertex {
        &mut self.verts[offset]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vertex> {
        self.verts.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Vertex> {
        self.verts.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_wire_roundtrip_1() {
        // cargo test vertex_wire_roundtrip_1 -- --nocapture
        let mut vert = Vertex::new(construct_vertex_id(2, 17));
        vert.partition = 1234;
        vert.set(0, 3.25);
        vert.set(7, -0.5);
        let mut words = [0u64; VERTEX_WORDS];
        vert.encode(&mut words);
        let decoded = Vertex::decode(&words);
        assert_eq!(decoded, vert);
        assert_eq!(decoded.owner(), 2);
        assert_eq!(decoded.offset(), 17);
    }

    #[test]
    #[should_panic(expected = "owned by another PE")]
    fn vertex_store_rejects_foreign_ids_1() {
        // cargo test vertex_store_rejects_foreign_ids_1 -- --nocapture
        let verts = vec![Vertex::new(construct_vertex_id(1, 0))];
        LocalStore::new(0, verts);
    }
}
