//! Fixed-length block store
//!
//! The store is the ground truth for occupancy. Each allocator picks its own
//! block state type; the store only needs to know which value means "free".

use crate::core::{BlockIndex, FileId};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// A per-block state with a distinguished free value
pub trait BlockState: Copy + PartialEq + std::fmt::Debug {
    const FREE: Self;

    fn is_free(&self) -> bool {
        *self == Self::FREE
    }
}

/// Block state for contiguous allocation: free, or owned by one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtentBlock {
    Free,
    Owned(FileId),
}

impl BlockState for ExtentBlock {
    const FREE: Self = ExtentBlock::Free;
}

/// Block state for linked allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FatEntry {
    Free,
    /// Points to the following block of the same chain
    Next(BlockIndex),
    /// Last block of a chain
    Terminator,
}

impl BlockState for FatEntry {
    const FREE: Self = FatEntry::Free;
}

/// Ordered sequence of `len` blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockStore<B> {
    blocks: Vec<B>,
}

impl<B: BlockState> BlockStore<B> {
    /// Create a store with every block free
    pub fn new(block_count: usize) -> Self {
        BlockStore {
            blocks: vec![B::FREE; block_count],
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: BlockIndex) -> B {
        self.blocks[index]
    }

    pub fn set(&mut self, index: BlockIndex, state: B) {
        self.blocks[index] = state;
    }

    pub fn is_free(&self, index: BlockIndex) -> bool {
        self.blocks[index].is_free()
    }

    /// Set every block in `range` to `state`
    pub fn fill(&mut self, range: Range<BlockIndex>, state: B) {
        self.blocks[range].fill(state);
    }

    pub fn as_slice(&self) -> &[B] {
        &self.blocks
    }

    /// Count free blocks in `range`
    pub fn count_free(&self, range: Range<BlockIndex>) -> usize {
        self.blocks[range].iter().filter(|b| b.is_free()).count()
    }

    /// True if `len` blocks starting at `start` exist and are all free
    pub fn run_is_free(&self, start: BlockIndex, len: usize) -> bool {
        match start.checked_add(len) {
            Some(end) if end <= self.blocks.len() => {
                self.blocks[start..end].iter().all(|b| b.is_free())
            }
            _ => false,
        }
    }

    /// First-fit: lowest index starting `len` consecutive free blocks
    pub fn first_fit(&self, len: usize) -> Option<BlockIndex> {
        if len == 0 {
            return Some(0);
        }

        let mut run = 0usize;
        for (i, block) in self.blocks.iter().enumerate() {
            if block.is_free() {
                run += 1;
                if run == len {
                    return Some(i + 1 - len);
                }
            } else {
                run = 0;
            }
        }
        None
    }

    /// Next free block at or after `from`
    pub fn next_free(&self, from: BlockIndex) -> Option<BlockIndex> {
        self.blocks
            .get(from..)?
            .iter()
            .position(|b| b.is_free())
            .map(|offset| from + offset)
    }

    /// Maximal runs of free blocks within `range`, as `(start, len)`
    pub fn free_runs(&self, range: Range<BlockIndex>) -> Vec<(BlockIndex, usize)> {
        let mut runs = Vec::new();
        let mut current: Option<(BlockIndex, usize)> = None;

        for i in range {
            if self.blocks[i].is_free() {
                current = match current {
                    Some((start, len)) => Some((start, len + 1)),
                    None => Some((i, 1)),
                };
            } else if let Some(run) = current.take() {
                runs.push(run);
            }
        }
        if let Some(run) = current {
            runs.push(run);
        }
        runs
    }

    /// Move the blocks in `range` `shift` slots to the left, freeing the
    /// vacated tail
    pub fn shift_left(&mut self, range: Range<BlockIndex>, shift: usize) {
        if shift == 0 || range.is_empty() {
            return;
        }
        let dest = range.start - shift;
        let len = range.len();
        self.blocks.copy_within(range.clone(), dest);

        let vacated = (dest + len).max(range.start)..range.end;
        self.blocks[vacated].fill(B::FREE);
    }

    /// Rotate `range` left by `mid` slots
    pub fn rotate_left(&mut self, range: Range<BlockIndex>, mid: usize) {
        self.blocks[range].rotate_left(mid);
    }
}
