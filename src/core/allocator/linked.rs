//! Linked allocation (file allocation table)
//!
//! Each block's table entry is free, points at the next block of a chain, or
//! terminates a chain. Files are recorded only by their head block; sizes
//! are derived by walking the chain. The leading blocks of the volume hold
//! the table itself and are never handed to files.

use crate::allocator::{fragmentation_from_runs, FileAllocator, Lookup, Strategy};
use crate::block::{BlockState, BlockStore, FatEntry};
use crate::config::VolumeConfig;
use crate::core::{BlockIndex, FileId};
use crate::error::{AllocError, Result};
use crate::translate::AddressTranslator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Blocks needed to store one table entry per block of the volume
///
/// `None` when the table's byte size does not fit in a `u64`.
pub fn reserved_table_blocks(
    block_size: u64,
    block_count: usize,
    fat_entry_size: u64,
) -> Option<usize> {
    let table_bytes = fat_entry_size.checked_mul(block_count as u64)?;
    usize::try_from(table_bytes.div_ceil(block_size.max(1))).ok()
}

/// Walks a chain from its head, yielding each block index
pub struct ChainIter<'a> {
    blocks: &'a BlockStore<FatEntry>,
    current: Option<BlockIndex>,
}

impl Iterator for ChainIter<'_> {
    type Item = BlockIndex;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = match self.blocks.get(current) {
            FatEntry::Next(next) => Some(next),
            FatEntry::Terminator | FatEntry::Free => None,
        };
        Some(current)
    }
}

/// File allocation table allocator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedAllocator {
    translator: AddressTranslator,
    fat_entry_size: u64,

    /// Leading blocks holding the table
    reserved: usize,

    blocks: BlockStore<FatEntry>,

    /// Head block per file, `None` for an empty file
    heads: BTreeMap<FileId, Option<BlockIndex>>,

    capacity: usize,
    size: usize,
}

impl LinkedAllocator {
    /// Create an empty volume and reserve room for its table
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the table would leave no data blocks.
    pub fn new(block_size: u64, block_count: usize, fat_entry_size: u64) -> Result<Self> {
        let translator = AddressTranslator::new(block_size)?;
        if fat_entry_size == 0 {
            return Err(AllocError::InvalidConfig(
                "table entry size must be at least 1 byte".to_string(),
            ));
        }

        let reserved = reserved_table_blocks(block_size, block_count, fat_entry_size)
            .ok_or_else(|| {
                AllocError::InvalidConfig(format!(
                    "table of {} entries of {} bytes overflows",
                    block_count, fat_entry_size
                ))
            })?;
        if reserved >= block_count {
            return Err(AllocError::InvalidConfig(format!(
                "table needs {} of {} blocks, leaving none for files",
                reserved, block_count
            )));
        }

        let mut blocks = BlockStore::new(block_count);
        for i in 0..reserved - 1 {
            blocks.set(i, FatEntry::Next(i + 1));
        }
        blocks.set(reserved - 1, FatEntry::Terminator);

        debug!(
            "Reserved {} of {} blocks for the allocation table",
            reserved, block_count
        );

        Ok(LinkedAllocator {
            translator,
            fat_entry_size,
            reserved,
            blocks,
            heads: BTreeMap::new(),
            capacity: block_count - reserved,
            size: 0,
        })
    }

    pub fn from_config(config: &VolumeConfig) -> Result<Self> {
        config.check()?;
        Self::new(config.block_size, config.block_count, config.fat_entry_size)
    }

    pub fn fat_entry_size(&self) -> u64 {
        self.fat_entry_size
    }

    pub fn blocks(&self) -> &BlockStore<FatEntry> {
        &self.blocks
    }

    /// Head block of a file (`None` for an empty file)
    pub fn head(&self, file_id: FileId) -> Result<Option<BlockIndex>> {
        self.heads
            .get(&file_id)
            .copied()
            .ok_or(AllocError::UnknownFile(file_id))
    }

    /// Physical blocks of a file in chain order
    pub fn chain(&self, file_id: FileId) -> Result<Vec<BlockIndex>> {
        Ok(self.walk(self.head(file_id)?).collect())
    }

    /// Number of blocks in a file's chain
    pub fn chain_length(&self, file_id: FileId) -> Result<usize> {
        Ok(self.walk(self.head(file_id)?).count())
    }

    fn walk(&self, head: Option<BlockIndex>) -> ChainIter<'_> {
        ChainIter {
            blocks: &self.blocks,
            current: head,
        }
    }

    /// The first `count` free data blocks, scanning forward past the table
    fn find_free(&self, count: usize) -> Result<Vec<BlockIndex>> {
        let found: Vec<BlockIndex> = (self.reserved..self.blocks.len())
            .filter(|&i| self.blocks.is_free(i))
            .take(count)
            .collect();

        if found.len() < count {
            let message = format!(
                "found {} free blocks for a request of {} with capacity {}",
                found.len(),
                count,
                self.capacity
            );
            error!("{}", message);
            debug_assert!(false, "{}", message);
            return Err(AllocError::Inconsistent(message));
        }
        Ok(found)
    }

    /// Link `nodes` in order and terminate the chain
    fn link(&mut self, nodes: &[BlockIndex]) {
        for pair in nodes.windows(2) {
            self.blocks.set(pair[0], FatEntry::Next(pair[1]));
        }
        if let Some(&last) = nodes.last() {
            self.blocks.set(last, FatEntry::Terminator);
        }
    }
}

impl FileAllocator for LinkedAllocator {
    fn create_file(&mut self, file_id: FileId, length: u64) -> Result<()> {
        if self.heads.contains_key(&file_id) {
            return Err(AllocError::DuplicateFile(file_id));
        }

        let need = self.translator.bytes_to_blocks(length);
        if self.capacity < need {
            return Err(AllocError::InsufficientCapacity {
                requested: need,
                available: self.capacity,
            });
        }

        let nodes = self.find_free(need)?;
        self.link(&nodes);
        self.heads.insert(file_id, nodes.first().copied());
        self.capacity -= need;
        self.size += need;

        debug!(
            "Created file {} ({} bytes) as a chain of {} blocks",
            file_id, length, need
        );
        Ok(())
    }

    fn locate(&self, file_id: FileId, byte_offset: u64) -> Result<Lookup> {
        let head = self.head(file_id)?;
        let hops = self.translator.bytes_to_blocks(byte_offset).saturating_sub(1);

        let mut current = head.ok_or(AllocError::OffsetOutOfRange {
            offset: byte_offset,
            length: 0,
        })?;

        for hop in 0..hops {
            current = match self.blocks.get(current) {
                FatEntry::Next(next) => next,
                _ => {
                    return Err(AllocError::OffsetOutOfRange {
                        offset: byte_offset,
                        length: self.translator.blocks_to_bytes(hop + 1).unwrap_or(u64::MAX),
                    })
                }
            };
        }

        Ok(Lookup {
            block: current,
            hops,
        })
    }

    fn extend(&mut self, file_id: FileId, extra_blocks: usize) -> Result<()> {
        let head = self.head(file_id)?;

        if self.capacity < extra_blocks {
            return Err(AllocError::InsufficientCapacity {
                requested: extra_blocks,
                available: self.capacity,
            });
        }
        if extra_blocks == 0 {
            return Ok(());
        }

        let tail = self.walk(head).last();
        let nodes = self.find_free(extra_blocks)?;

        match tail {
            Some(tail) => self.blocks.set(tail, FatEntry::Next(nodes[0])),
            None => {
                self.heads.insert(file_id, Some(nodes[0]));
            }
        }
        self.link(&nodes);
        self.capacity -= extra_blocks;
        self.size += extra_blocks;

        debug!("Extended file {} by {} blocks", file_id, extra_blocks);
        Ok(())
    }

    fn shrink(&mut self, file_id: FileId, shrink_blocks: usize) -> Result<()> {
        let nodes = self.chain(file_id)?;

        if shrink_blocks >= nodes.len() {
            return Err(AllocError::ShrinkTooLarge {
                requested: shrink_blocks,
                held: nodes.len(),
            });
        }

        let keep = nodes.len() - shrink_blocks;
        self.blocks.set(nodes[keep - 1], FatEntry::Terminator);
        for &node in &nodes[keep..] {
            self.blocks.set(node, FatEntry::Free);
        }
        self.capacity += shrink_blocks;
        self.size -= shrink_blocks;

        debug!(
            "Shrunk file {} by {} blocks, {} remain",
            file_id, shrink_blocks, keep
        );
        Ok(())
    }

    fn delete(&mut self, file_id: FileId) -> Result<()> {
        let nodes = self.chain(file_id)?;

        for &node in &nodes {
            self.blocks.set(node, FatEntry::Free);
        }
        self.heads.remove(&file_id);
        self.capacity += nodes.len();
        self.size -= nodes.len();

        debug!("Deleted file {}, released {} blocks", file_id, nodes.len());
        Ok(())
    }

    fn blocks_used(&self, file_id: FileId) -> Result<usize> {
        self.chain_length(file_id)
    }

    fn contains(&self, file_id: FileId) -> bool {
        self.heads.contains_key(&file_id)
    }

    fn file_count(&self) -> usize {
        self.heads.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn size(&self) -> usize {
        self.size
    }

    fn total_blocks(&self) -> usize {
        self.blocks.len()
    }

    fn reserved_blocks(&self) -> usize {
        self.reserved
    }

    fn block_size(&self) -> u64 {
        self.translator.block_size()
    }

    fn strategy(&self) -> Strategy {
        Strategy::Linked
    }

    fn fragmentation_score(&self) -> f64 {
        fragmentation_from_runs(&self.blocks.free_runs(self.reserved..self.blocks.len()))
    }

    fn check_consistency(&self) -> Result<()> {
        let total = self.blocks.len();

        if self.capacity + self.size + self.reserved != total {
            return Err(AllocError::Inconsistent(format!(
                "capacity {} + size {} + table {} != {} blocks",
                self.capacity, self.size, self.reserved, total
            )));
        }

        for i in 0..self.reserved {
            let expected = if i + 1 == self.reserved {
                FatEntry::Terminator
            } else {
                FatEntry::Next(i + 1)
            };
            if self.blocks.get(i) != expected {
                return Err(AllocError::Inconsistent(format!(
                    "table block {} is {:?}",
                    i,
                    self.blocks.get(i)
                )));
            }
        }

        let free = self.blocks.count_free(self.reserved..total);
        if free != self.capacity {
            return Err(AllocError::Inconsistent(format!(
                "{} free blocks in table, capacity says {}",
                free, self.capacity
            )));
        }

        let mut visited = vec![false; total];
        let mut chained = 0usize;
        for (&id, &head) in &self.heads {
            let mut current = head;
            while let Some(node) = current {
                if node < self.reserved || node >= total {
                    return Err(AllocError::Inconsistent(format!(
                        "file {} chain reaches block {} outside the data region",
                        id, node
                    )));
                }
                if visited[node] {
                    return Err(AllocError::Inconsistent(format!(
                        "block {} reached twice while walking file {}",
                        node, id
                    )));
                }
                visited[node] = true;
                chained += 1;

                current = match self.blocks.get(node) {
                    FatEntry::Next(next) => Some(next),
                    FatEntry::Terminator => None,
                    FatEntry::Free => {
                        return Err(AllocError::Inconsistent(format!(
                            "file {} chain runs into free block {}",
                            id, node
                        )))
                    }
                };
            }
        }

        if chained != self.size {
            return Err(AllocError::Inconsistent(format!(
                "chains hold {} blocks, size says {}",
                chained, self.size
            )));
        }

        let orphans = (self.reserved..total)
            .filter(|&i| !visited[i] && !self.blocks.get(i).is_free())
            .count();
        if orphans > 0 {
            return Err(AllocError::Inconsistent(format!(
                "{} allocated blocks belong to no file",
                orphans
            )));
        }

        Ok(())
    }
}
