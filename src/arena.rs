//! Word Arena
//!
//! Pooled allocator handing out blocks of u64 words from a single fixed
//! region. Blocks are rounded up to power-of-two size classes and recycled
//! through per-class free lists, so frees may happen in any order without
//! touching the global allocator. The whole region is reclaimed when the
//! arena is dropped. Exhaustion is fatal.
//!

use crate::util::*;

/// smallest block handed out, in words
pub const ARENA_MIN_BLOCK_WORDS: usize = 4;

const FREE_LIST_END: u64 = u64::MAX;

/// a block inside an arena; the arena that produced it must be used to
/// resolve or free it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordBlock {
    offset: u32,
    class: u8,
}

impl WordBlock {
    /// capacity of the block in words
    pub fn capacity(&self) -> usize {
        ARENA_MIN_BLOCK_WORDS << self.class
    }
}

pub struct Arena {
    name: &'static str,
    pe: PeId,
    store: Vec<u64>,
    cursor: usize,
    // head offset of the free list per size class, FREE_LIST_END when empty
    free_heads: Vec<u64>,
    used_words: usize,
}

fn class_for(nwords: usize) -> usize {
    let mut class = 0;
    let mut size = ARENA_MIN_BLOCK_WORDS;
    while size < nwords {
        size <<= 1;
        class += 1;
    }
    class
}

impl Arena {
    pub fn new(name: &'static str, pe: PeId, capacity_words: usize) -> Self {
        let n_classes = class_for(capacity_words.max(ARENA_MIN_BLOCK_WORDS)) + 1;
        Self {
            name,
            pe,
            store: vec![0; capacity_words],
            cursor: 0,
            free_heads: vec![FREE_LIST_END; n_classes],
            used_words: 0,
        }
    }

    /// allocate a zeroed block of at least `nwords` words
    pub fn alloc(&mut self, nwords: usize) -> WordBlock {
        assert!(nwords > 0);
        let class = class_for(nwords);
        if class >= self.free_heads.len() {
            eprintln!(
                "ERROR: PE {} asked the {} arena for {} words, beyond its {}-word region",
                self.pe,
                self.name,
                nwords,
                self.store.len()
            );
            panic!("{} arena exhausted on PE {}", self.name, self.pe);
        }
        let size = ARENA_MIN_BLOCK_WORDS << class;
        let offset = if self.free_heads[class] != FREE_LIST_END {
            let offset = self.free_heads[class] as usize;
            self.free_heads[class] = self.store[offset];
            self.store[offset] = 0;
            offset
        } else {
            if self.cursor + size > self.store.len() {
                eprintln!(
                    "ERROR: PE {} exhausted {} words in the {} arena",
                    self.pe,
                    self.store.len(),
                    self.name
                );
                panic!("{} arena exhausted on PE {}", self.name, self.pe);
            }
            let offset = self.cursor;
            self.cursor += size;
            offset
        };
        self.used_words += size;
        WordBlock {
            offset: offset as u32,
            class: class as u8,
        }
    }

    /// return a block to its size-class free list
    pub fn free(&mut self, block: WordBlock) {
        let class = block.class as usize;
        let offset = block.offset as usize;
        self.store[offset] = self.free_heads[class];
        self.free_heads[class] = offset as u64;
        self.used_words -= block.capacity();
    }

    pub fn words(&self, block: WordBlock, len: usize) -> &[u64] {
        debug_assert!(len <= block.capacity());
        let offset = block.offset as usize;
        &self.store[offset..offset + len]
    }

    pub fn words_mut(&mut self, block: WordBlock, len: usize) -> &mut [u64] {
        debug_assert!(len <= block.capacity());
        let offset = block.offset as usize;
        &mut self.store[offset..offset + len]
    }

    /// copy `len` words from `src` into `dst`; the blocks must not overlap
    pub fn copy(&mut self, dst: WordBlock, src: WordBlock, len: usize) {
        debug_assert!(len <= dst.capacity() && len <= src.capacity());
        let (dst_off, src_off) = (dst.offset as usize, src.offset as usize);
        debug_assert!(dst_off + len <= src_off || src_off + len <= dst_off);
        self.store.copy_within(src_off..src_off + len, dst_off);
    }

    pub fn used_words(&self) -> usize {
        self.used_words
    }

    pub fn capacity_words(&self) -> usize {
        self.store.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_alloc_free_reuse_1() {
        // cargo test arena_alloc_free_reuse_1 -- --nocapture
        let mut arena = Arena::new("test", 0, 64);
        let a = arena.alloc(3);
        assert_eq!(a.capacity(), 4);
        let b = arena.alloc(5);
        assert_eq!(b.capacity(), 8);
        arena.words_mut(a, 3).copy_from_slice(&[1, 2, 3]);
        arena.words_mut(b, 5).copy_from_slice(&[9, 9, 9, 9, 9]);
        assert_eq!(arena.words(a, 3), &[1, 2, 3]);
        arena.free(a);
        // same class allocation reuses the freed slot, zeroed linkage aside
        let c = arena.alloc(4);
        assert_eq!(c, a);
        assert_eq!(arena.words(b, 5), &[9, 9, 9, 9, 9]);
    }

    #[test]
    fn arena_out_of_order_free_1() {
        // cargo test arena_out_of_order_free_1 -- --nocapture
        let mut arena = Arena::new("test", 0, 256);
        let blocks: Vec<_> = (0..8).map(|_| arena.alloc(4)).collect();
        for block in blocks.iter().rev() {
            arena.free(*block);
        }
        assert_eq!(arena.used_words(), 0);
        for _ in 0..8 {
            arena.alloc(4);
        }
        assert_eq!(arena.used_words(), 32);
    }

    #[test]
    #[should_panic(expected = "arena exhausted")]
    fn arena_exhaustion_is_fatal_1() {
        // cargo test arena_exhaustion_is_fatal_1 -- --nocapture
        let mut arena = Arena::new("tiny", 3, 8);
        arena.alloc(8);
        arena.alloc(1);
    }
}
