//! One-Sided Transport
//!
//! The abstract contract the runtime needs from its messaging layer: word
//! atomics and bulk copies against symmetric memory, a fence, a barrier, and
//! unordered coupling-message delivery. The runtime does not care whether
//! this is backed by a partitioned global address space, RDMA or TCP.
//!
//! The reference implementation runs every PE as a worker thread of one
//! process: symmetric memory is a per-PE array of atomics, the fence is a
//! sequentially consistent atomic fence, and coupling messages travel through
//! locked per-PE queues. A rayon pool hosts one worker per PE.
//!

use crate::parking_lot::Mutex;
use crate::util::*;
use crate::vertex::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

/// a word offset into the symmetric heap; the same offset names an object on
/// every PE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymmAddr(pub usize);

impl SymmAddr {
    pub fn offset(self, words: usize) -> SymmAddr {
        SymmAddr(self.0 + words)
    }
}

/// a coupling message addressed to one vertex of the receiving PE
#[derive(Debug, Clone, PartialEq)]
pub struct CouplingEnvelope {
    pub dst: VertexId,
    pub payload: Vertex,
}

pub trait Transport: Send + Sync {
    fn my_pe(&self) -> PeId;
    fn n_pes(&self) -> usize;

    /// collective symmetric allocation; every PE must call in the same order
    /// with the same size, and the call barriers before returning
    fn symm_alloc(&self, nwords: usize) -> SymmAddr;

    fn atomic_or(&self, addr: SymmAddr, mask: u64, pe: PeId);
    fn atomic_and(&self, addr: SymmAddr, mask: u64, pe: PeId);
    fn atomic_inc(&self, addr: SymmAddr, pe: PeId);
    fn atomic_fetch(&self, addr: SymmAddr, pe: PeId) -> u64;

    /// orders this initiator's previously issued operations before its
    /// subsequent ones, as observed by any one remote PE
    fn fence(&self);

    fn get_bulk(&self, dst: &mut [u64], src: SymmAddr, pe: PeId);
    fn put_bulk(&self, src: &[u64], dst: SymmAddr, pe: PeId);

    fn barrier_all(&self);

    fn send_msg(&self, pe: PeId, envelope: CouplingEnvelope);
    fn poll_msg(&self) -> Option<CouplingEnvelope>;
}

struct HeapShared {
    regions: Vec<Vec<AtomicU64>>,
    cursors: Vec<AtomicUsize>,
    mailboxes: Vec<Mutex<VecDeque<CouplingEnvelope>>>,
    barrier: Barrier,
    heap_words: usize,
    n_pes: usize,
}

/// in-process reference transport; clone-free, one value per PE worker
pub struct LocalMemTransport {
    shared: Arc<HeapShared>,
    pe: PeId,
}

impl LocalMemTransport {
    fn heap(n_pes: usize, heap_words: usize) -> Arc<HeapShared> {
        let regions = (0..n_pes)
            .map(|_| (0..heap_words).map(|_| AtomicU64::new(0)).collect())
            .collect();
        Arc::new(HeapShared {
            regions,
            cursors: (0..n_pes).map(|_| AtomicUsize::new(0)).collect(),
            mailboxes: (0..n_pes).map(|_| Mutex::new(VecDeque::new())).collect(),
            barrier: Barrier::new(n_pes),
            heap_words,
            n_pes,
        })
    }

    /// a one-PE job, enough for unit tests of the symmetric structures
    pub fn single(heap_words: usize) -> Self {
        Self {
            shared: Self::heap(1, heap_words),
            pe: 0,
        }
    }

    /// run `body` once per PE on a dedicated pool of `n_pes` worker threads;
    /// returns when every worker is done
    pub fn launch<F>(n_pes: usize, heap_words: usize, body: F)
    where
        F: Fn(LocalMemTransport) + Sync,
    {
        assert!(n_pes > 0);
        let shared = Self::heap(n_pes, heap_words);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_pes)
            .build()
            .expect("building the PE worker pool");
        let body = &body;
        pool.scope(|scope| {
            for pe in 0..n_pes {
                let transport = LocalMemTransport {
                    shared: shared.clone(),
                    pe,
                };
                scope.spawn(move |_| body(transport));
            }
        });
    }

    fn word(&self, addr: SymmAddr, pe: PeId) -> &AtomicU64 {
        &self.shared.regions[pe][addr.0]
    }
}

impl Transport for LocalMemTransport {
    fn my_pe(&self) -> PeId {
        self.pe
    }

    fn n_pes(&self) -> usize {
        self.shared.n_pes
    }

    fn symm_alloc(&self, nwords: usize) -> SymmAddr {
        let offset = self.shared.cursors[self.pe].fetch_add(nwords, Ordering::SeqCst);
        if offset + nwords > self.shared.heap_words {
            eprintln!(
                "ERROR: PE {} exhausted {} words of symmetric heap",
                self.pe, self.shared.heap_words
            );
            panic!("symmetric heap exhausted on PE {}", self.pe);
        }
        self.barrier_all();
        SymmAddr(offset)
    }

    fn atomic_or(&self, addr: SymmAddr, mask: u64, pe: PeId) {
        self.word(addr, pe).fetch_or(mask, Ordering::SeqCst);
    }

    fn atomic_and(&self, addr: SymmAddr, mask: u64, pe: PeId) {
        self.word(addr, pe).fetch_and(mask, Ordering::SeqCst);
    }

    fn atomic_inc(&self, addr: SymmAddr, pe: PeId) {
        self.word(addr, pe).fetch_add(1, Ordering::SeqCst);
    }

    fn atomic_fetch(&self, addr: SymmAddr, pe: PeId) -> u64 {
        self.word(addr, pe).load(Ordering::SeqCst)
    }

    fn fence(&self) {
        std::sync::atomic::fence(Ordering::SeqCst);
    }

    fn get_bulk(&self, dst: &mut [u64], src: SymmAddr, pe: PeId) {
        for (i, slot) in dst.iter_mut().enumerate() {
            *slot = self.word(src.offset(i), pe).load(Ordering::SeqCst);
        }
    }

    fn put_bulk(&self, src: &[u64], dst: SymmAddr, pe: PeId) {
        for (i, word) in src.iter().enumerate() {
            self.word(dst.offset(i), pe).store(*word, Ordering::SeqCst);
        }
    }

    fn barrier_all(&self) {
        self.shared.barrier.wait();
    }

    fn send_msg(&self, pe: PeId, envelope: CouplingEnvelope) {
        self.shared.mailboxes[pe].lock().push_back(envelope);
    }

    fn poll_msg(&self) -> Option<CouplingEnvelope> {
        self.shared.mailboxes[self.pe].lock().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as TestCounter;

    #[test]
    fn transport_single_pe_atomics_1() {
        // cargo test transport_single_pe_atomics_1 -- --nocapture
        let transport = LocalMemTransport::single(64);
        let addr = transport.symm_alloc(4);
        transport.atomic_or(addr, 0b1010, 0);
        transport.atomic_and(addr, !0b0010, 0);
        transport.atomic_inc(addr.offset(1), 0);
        transport.atomic_inc(addr.offset(1), 0);
        assert_eq!(transport.atomic_fetch(addr, 0), 0b1000);
        assert_eq!(transport.atomic_fetch(addr.offset(1), 0), 2);
        let mut words = [0u64; 2];
        transport.get_bulk(&mut words, addr, 0);
        assert_eq!(words, [0b1000, 2]);
    }

    #[test]
    fn transport_symmetric_alloc_agreement_1() {
        // cargo test transport_symmetric_alloc_agreement_1 -- --nocapture
        let hits = TestCounter::new(0);
        LocalMemTransport::launch(4, 256, |transport| {
            let a = transport.symm_alloc(16);
            let b = transport.symm_alloc(8);
            assert_eq!(a, SymmAddr(0));
            assert_eq!(b, SymmAddr(16));
            // write into my slot of b, read everyone's after the barrier
            transport.put_bulk(&[transport.my_pe() as u64 + 1], b, transport.my_pe());
            transport.barrier_all();
            for pe in 0..transport.n_pes() {
                assert_eq!(transport.atomic_fetch(b, pe), pe as u64 + 1);
            }
            hits.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn transport_remote_atomics_serialize_1() {
        // cargo test transport_remote_atomics_serialize_1 -- --nocapture
        // every PE increments a counter on PE 0; the owner serializes them all
        LocalMemTransport::launch(4, 64, |transport| {
            let addr = transport.symm_alloc(1);
            for _ in 0..100 {
                transport.atomic_inc(addr, 0);
            }
            transport.barrier_all();
            assert_eq!(transport.atomic_fetch(addr, 0), 400);
        });
    }

    #[test]
    fn transport_coupling_mailbox_1() {
        // cargo test transport_coupling_mailbox_1 -- --nocapture
        LocalMemTransport::launch(2, 16, |transport| {
            if transport.my_pe() == 0 {
                let payload = Vertex::new(construct_vertex_id(0, 0));
                transport.send_msg(
                    1,
                    CouplingEnvelope {
                        dst: construct_vertex_id(1, 0),
                        payload,
                    },
                );
            }
            transport.barrier_all();
            if transport.my_pe() == 1 {
                let envelope = transport.poll_msg().expect("message delivered");
                assert_eq!(vertex_id_owner(envelope.dst), 1);
                assert!(transport.poll_msg().is_none());
            }
        });
    }
}
