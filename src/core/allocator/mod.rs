//! Block allocation strategies
//!
//! Two engines share one interface:
//! - [`contiguous::ContiguousAllocator`]: directory table of start + length
//!   records, first-fit placement, compaction on fragmentation
//! - [`linked::LinkedAllocator`]: file allocation table of per-block next
//!   pointers, chains need not be contiguous

pub mod contiguous;
pub mod linked;

use crate::core::{BlockIndex, FileId};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which allocation engine to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Directory table (contiguous allocation)
    Contiguous,
    /// File allocation table (linked allocation)
    Linked,
}

impl Strategy {
    pub const ALL: [Strategy; 2] = [Strategy::Contiguous, Strategy::Linked];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Contiguous => "contiguous",
            Strategy::Linked => "linked",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "contiguous" | "dt" | "directory-table" => Ok(Strategy::Contiguous),
            "linked" | "fat" => Ok(Strategy::Linked),
            _ => Err(format!(
                "Invalid strategy '{}'. Valid options: contiguous, linked",
                s
            )),
        }
    }
}

/// Result of resolving a byte offset to a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lookup {
    /// Block holding the requested byte
    pub block: BlockIndex,
    /// Pointer hops followed to reach `block` (always 0 for contiguous files)
    pub hops: usize,
}

/// File-level block allocator
///
/// Every call is a complete transaction: on `Err` nothing was mutated.
pub trait FileAllocator {
    /// Allocate blocks for a new file of `length` bytes
    fn create_file(&mut self, file_id: FileId, length: u64) -> Result<()>;

    /// Resolve `byte_offset` of a file to a block, reporting traversal cost
    fn locate(&self, file_id: FileId, byte_offset: u64) -> Result<Lookup>;

    /// Block holding the byte at `byte_offset`
    fn access(&self, file_id: FileId, byte_offset: u64) -> Result<BlockIndex> {
        self.locate(file_id, byte_offset).map(|lookup| lookup.block)
    }

    /// Grow a file by `extra_blocks` blocks
    fn extend(&mut self, file_id: FileId, extra_blocks: usize) -> Result<()>;

    /// Release the last `shrink_blocks` blocks of a file
    fn shrink(&mut self, file_id: FileId, shrink_blocks: usize) -> Result<()>;

    /// Release every block of a file and forget it
    fn delete(&mut self, file_id: FileId) -> Result<()>;

    /// Blocks currently held by a file
    fn blocks_used(&self, file_id: FileId) -> Result<usize>;

    fn contains(&self, file_id: FileId) -> bool;

    fn file_count(&self) -> usize;

    /// Free blocks available for files
    fn capacity(&self) -> usize;

    /// Blocks held by files
    fn size(&self) -> usize;

    /// Total blocks in the volume
    fn total_blocks(&self) -> usize;

    /// Blocks permanently held by allocator metadata
    fn reserved_blocks(&self) -> usize {
        0
    }

    fn block_size(&self) -> u64;

    fn strategy(&self) -> Strategy;

    /// 0.0 when free space is one run, higher when it is scattered
    fn fragmentation_score(&self) -> f64;

    /// Verify free-space accounting against the block store
    fn check_consistency(&self) -> Result<()>;
}

/// Fragmentation from the free runs of a data region
pub(crate) fn fragmentation_from_runs(runs: &[(BlockIndex, usize)]) -> f64 {
    let free_blocks: usize = runs.iter().map(|(_, len)| len).sum();
    if free_blocks == 0 || runs.len() <= 1 {
        return 0.0;
    }
    (runs.len() as f64 - 1.0) / free_blocks as f64
}
