//! Buffered Messages
//!
//! Per-vertex mailboxes for coupling payloads. Each local vertex owns a
//! singly linked list of message nodes drawn from a preallocated pool, so
//! insertion and polling never touch the global allocator. Lists are LIFO;
//! delivery order carries no meaning and receivers treat a mailbox as a
//! multiset.
//!

use crate::slab::*;
use crate::util::*;
use crate::vertex::*;

#[derive(Debug, Clone)]
struct MsgNode {
    vert: Vertex,
    next: Handle,
}

impl Default for MsgNode {
    fn default() -> Self {
        Self {
            vert: Vertex::new(0),
            next: NIL,
        }
    }
}

pub struct BufferedMsgs {
    heads: Vec<Handle>,
    pool: Slab<MsgNode>,
}

impl BufferedMsgs {
    pub fn new(pe: PeId, nvertices: usize, pool_nodes: usize) -> Self {
        Self {
            heads: vec![NIL; nvertices],
            pool: Slab::new("buffered message", pe, pool_nodes),
        }
    }

    pub fn insert(&mut self, i: LocalOffset, payload: &Vertex) {
        let node = self.pool.alloc(MsgNode {
            vert: *payload,
            next: self.heads[i],
        });
        self.heads[i] = node;
    }

    /// pop one message for vertex `i`, most recent first
    pub fn poll(&mut self, i: LocalOffset) -> Option<Vertex> {
        let head = self.heads[i];
        if head == NIL {
            return None;
        }
        let node = self.pool.get(head);
        let vert = node.vert;
        self.heads[i] = node.next;
        self.pool.free(head);
        Some(vert)
    }

    pub fn pending(&self, i: LocalOffset) -> usize {
        let mut count = 0;
        let mut cursor = self.heads[i];
        while cursor != NIL {
            count += 1;
            cursor = self.pool.get(cursor).next;
        }
        count
    }

    pub fn mem_used(&self) -> usize {
        self.heads.len() * std::mem::size_of::<Handle>()
            + self.pool.capacity() * std::mem::size_of::<MsgNode>()
    }
}
