//! Distributed Bitmap
//!
//! Process-global partition × PE membership matrix, split row-wise across the
//! job: row `p` lives on PE `p / rows_per_pe`. Bits are flipped with remote
//! atomic OR/AND; every write then bumps the row's sequence number behind a
//! fence, so a reader that observes a sequence number and bulk-reads the row
//! afterwards sees at least every write that preceded that increment. Row
//! reads are not consistent snapshots; consumers gate re-reads on the
//! sequence number.
//!

use crate::arena::*;
use crate::transport::*;
use crate::util::*;
use std::sync::Arc;

/// a local copy of one remote row plus the sequence number fetched before the
/// bulk read; backed by the bitmap's subcopy arena and freed explicitly
#[derive(Debug)]
pub struct RowSnapshot {
    pub coord0: usize,
    pub seq_no: u64,
    block: WordBlock,
}

pub struct DistBitmap<T: Transport> {
    transport: Arc<T>,
    dim0: usize,
    dim1: usize,
    words_per_row: usize,
    rows_per_pe: usize,
    words_addr: SymmAddr,
    seqs_addr: SymmAddr,
    subcopies: Arena,
}

impl<T: Transport> DistBitmap<T> {
    /// collective constructor; `pool_bytes` sizes the local subcopy arena
    pub fn new(dim0: usize, dim1: usize, pool_bytes: usize, transport: Arc<T>) -> Self {
        let rows_per_pe = dim0.div_ceil(transport.n_pes());
        let words_per_row = dim1.div_ceil(64);
        let words_addr = transport.symm_alloc(rows_per_pe * words_per_row);
        let seqs_addr = transport.symm_alloc(rows_per_pe);
        let subcopies = Arena::new(
            "bitmap subcopy",
            transport.my_pe(),
            (pool_bytes / 8).max(words_per_row),
        );
        Self {
            transport,
            dim0,
            dim1,
            words_per_row,
            rows_per_pe,
            words_addr,
            seqs_addr,
            subcopies,
        }
    }

    fn row_location(&self, coord0: usize) -> (PeId, usize) {
        assert!(coord0 < self.dim0);
        (coord0 / self.rows_per_pe, coord0 % self.rows_per_pe)
    }

    pub fn set(&self, coord0: usize, coord1: usize) {
        assert!(coord1 < self.dim1);
        let (pe, row) = self.row_location(coord0);
        let mask = 1u64 << (coord1 % 64);
        let addr = self.words_addr.offset(row * self.words_per_row + coord1 / 64);
        self.transport.atomic_or(addr, mask, pe);
        self.transport.fence();
        self.transport.atomic_inc(self.seqs_addr.offset(row), pe);
    }

    pub fn clear(&self, coord0: usize, coord1: usize) {
        assert!(coord1 < self.dim1);
        let (pe, row) = self.row_location(coord0);
        let mask = !(1u64 << (coord1 % 64));
        let addr = self.words_addr.offset(row * self.words_per_row + coord1 / 64);
        self.transport.atomic_and(addr, mask, pe);
        self.transport.fence();
        self.transport.atomic_inc(self.seqs_addr.offset(row), pe);
    }

    pub fn get_seq_no(&self, coord0: usize) -> u64 {
        let (pe, row) = self.row_location(coord0);
        self.transport.atomic_fetch(self.seqs_addr.offset(row), pe)
    }

    pub fn owning_pe(&self, coord0: usize) -> PeId {
        assert!(coord0 < self.dim0);
        coord0 / self.rows_per_pe
    }

    /// the clamped row range stored on this PE
    pub fn my_chunk(&self) -> (usize, usize) {
        let lower = (self.transport.my_pe() * self.rows_per_pe).min(self.dim0);
        let upper = ((self.transport.my_pe() + 1) * self.rows_per_pe).min(self.dim0);
        (lower, upper)
    }

    pub fn snapshot_new(&mut self) -> RowSnapshot {
        RowSnapshot {
            coord0: usize::MAX,
            seq_no: 0,
            block: self.subcopies.alloc(self.words_per_row),
        }
    }

    /// fetch the row's sequence number, then bulk-read the row; the row may
    /// change mid-read, but every write that preceded the fetched sequence
    /// number is visible
    pub fn copy_locally(&mut self, coord0: usize, out: &mut RowSnapshot) {
        let (pe, row) = self.row_location(coord0);
        out.coord0 = coord0;
        out.seq_no = self.transport.atomic_fetch(self.seqs_addr.offset(row), pe);
        let words = self.subcopies.words_mut(out.block, self.words_per_row);
        self.transport
            .get_bulk(words, self.words_addr.offset(row * self.words_per_row), pe);
    }

    pub fn snapshot_contains(&self, coord1: usize, snapshot: &RowSnapshot) -> bool {
        assert!(coord1 < self.dim1);
        let words = self.subcopies.words(snapshot.block, self.words_per_row);
        words[coord1 / 64] & (1u64 << (coord1 % 64)) != 0
    }

    pub fn snapshot_copy(&mut self, dst: &mut RowSnapshot, src: &RowSnapshot) {
        self.subcopies.copy(dst.block, src.block, self.words_per_row);
        dst.coord0 = src.coord0;
        dst.seq_no = src.seq_no;
    }

    pub fn snapshot_free(&mut self, snapshot: RowSnapshot) {
        self.subcopies.free(snapshot.block);
    }

    pub fn dim0(&self) -> usize {
        self.dim0
    }

    pub fn dim1(&self) -> usize {
        self.dim1
    }

    pub fn mem_used(&self) -> usize {
        (self.rows_per_pe * self.words_per_row + self.rows_per_pe) * 8
            + self.subcopies.capacity_words() * 8
    }
}
