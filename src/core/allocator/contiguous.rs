//! Contiguous allocation (directory table)
//!
//! Each file occupies one uninterrupted run of blocks, recorded as a start
//! block and a byte length. Placement is first-fit; when free space exists
//! but is too scattered, the volume is compacted (stable left-pack) and the
//! search retried.

use crate::allocator::{fragmentation_from_runs, FileAllocator, Lookup, Strategy};
use crate::block::{BlockStore, ExtentBlock};
use crate::config::VolumeConfig;
use crate::core::{BlockIndex, FileId};
use crate::error::{AllocError, Result};
use crate::translate::AddressTranslator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Directory table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileExtent {
    /// First block of the file
    pub start: BlockIndex,
    /// File length in bytes
    pub length: u64,
}

/// Directory-table allocator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContiguousAllocator {
    translator: AddressTranslator,
    blocks: BlockStore<ExtentBlock>,
    files: BTreeMap<FileId, FileExtent>,

    /// Free blocks
    capacity: usize,

    /// Blocks held by files
    size: usize,

    /// Compaction passes run so far
    compactions: usize,
}

impl ContiguousAllocator {
    /// Create an empty volume of `block_count` blocks of `block_size` bytes
    pub fn new(block_size: u64, block_count: usize) -> Result<Self> {
        Ok(ContiguousAllocator {
            translator: AddressTranslator::new(block_size)?,
            blocks: BlockStore::new(block_count),
            files: BTreeMap::new(),
            capacity: block_count,
            size: 0,
            compactions: 0,
        })
    }

    pub fn from_config(config: &VolumeConfig) -> Result<Self> {
        config.check()?;
        Self::new(config.block_size, config.block_count)
    }

    pub fn extent(&self, file_id: FileId) -> Option<FileExtent> {
        self.files.get(&file_id).copied()
    }

    /// Directory table entries ordered by file id
    pub fn extents(&self) -> impl Iterator<Item = (FileId, FileExtent)> + '_ {
        self.files.iter().map(|(&id, &extent)| (id, extent))
    }

    pub fn blocks(&self) -> &BlockStore<ExtentBlock> {
        &self.blocks
    }

    pub fn compaction_count(&self) -> usize {
        self.compactions
    }

    fn held_blocks(&self, extent: &FileExtent) -> usize {
        self.translator.bytes_to_blocks(extent.length)
    }

    fn lookup(&self, file_id: FileId) -> Result<FileExtent> {
        self.extent(file_id).ok_or(AllocError::UnknownFile(file_id))
    }

    fn bookkeeping_defect(&self, message: String) -> AllocError {
        error!("{}", message);
        debug_assert!(false, "{}", message);
        AllocError::Inconsistent(message)
    }

    /// Stable left-pack of every occupied block
    ///
    /// Occupied runs slide left over the free space before them, and every
    /// directory entry inside a moved run is rebased. File order and the
    /// occupied block count are unchanged. Returns the length of the
    /// trailing free run.
    pub fn compact(&mut self) -> usize {
        let total = self.blocks.len();
        let mut write = 0usize;
        let mut read = 0usize;
        let mut moved = 0usize;

        while read < total {
            if self.blocks.is_free(read) {
                read += 1;
                continue;
            }

            let run_start = read;
            while read < total && !self.blocks.is_free(read) {
                read += 1;
            }

            let shift = run_start - write;
            if shift > 0 {
                self.blocks.shift_left(run_start..read, shift);
                for extent in self.files.values_mut() {
                    if extent.start >= run_start && extent.start < read {
                        extent.start -= shift;
                    }
                }
                moved += read - run_start;
            }
            write += read - run_start;
        }

        self.compactions += 1;
        debug!(
            "Compacted volume: moved {} blocks, {} free at tail",
            moved,
            total - write
        );
        total - write
    }

    /// Move one file so it directly precedes the largest free run after it
    ///
    /// Everything between the file and that run slides left by the file's
    /// block count. Returns the file's new start.
    fn defragment(&mut self, file_id: FileId) -> Result<BlockIndex> {
        let extent = self.lookup(file_id)?;
        let held = self.held_blocks(&extent);
        let file_end = extent.start + held;

        let target = self
            .blocks
            .free_runs(file_end..self.blocks.len())
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)));

        let run_start = match target {
            Some((run_start, _)) if run_start > file_end => run_start,
            _ => return Ok(extent.start),
        };

        self.blocks.rotate_left(extent.start..run_start, held);
        for (&id, other) in self.files.iter_mut() {
            if id != file_id && other.start >= file_end && other.start < run_start {
                other.start -= held;
            }
        }

        let new_start = run_start - held;
        if let Some(entry) = self.files.get_mut(&file_id) {
            entry.start = new_start;
        }

        debug!(
            "Defragmented file {}: start {} -> {}",
            file_id, extent.start, new_start
        );
        Ok(new_start)
    }
}

impl FileAllocator for ContiguousAllocator {
    fn create_file(&mut self, file_id: FileId, length: u64) -> Result<()> {
        if self.files.contains_key(&file_id) {
            return Err(AllocError::DuplicateFile(file_id));
        }
        if length < 1 {
            return Err(AllocError::InvalidArgument(
                "file length must be at least 1 byte".to_string(),
            ));
        }

        let need = self.translator.bytes_to_blocks(length);
        if self.capacity < need {
            return Err(AllocError::InsufficientCapacity {
                requested: need,
                available: self.capacity,
            });
        }

        let start = match self.blocks.first_fit(need) {
            Some(start) => start,
            None => {
                // Capacity certified the space exists, so it is fragmented
                self.compact();
                self.blocks.first_fit(need).ok_or_else(|| {
                    self.bookkeeping_defect(format!(
                        "no run of {} blocks after compaction with {} free",
                        need, self.capacity
                    ))
                })?
            }
        };

        self.blocks
            .fill(start..start + need, ExtentBlock::Owned(file_id));
        self.files.insert(file_id, FileExtent { start, length });
        self.capacity -= need;
        self.size += need;

        debug!(
            "Created file {} ({} bytes) at blocks {}..{}",
            file_id,
            length,
            start,
            start + need
        );
        Ok(())
    }

    fn locate(&self, file_id: FileId, byte_offset: u64) -> Result<Lookup> {
        let extent = self.lookup(file_id)?;

        if byte_offset < 1 {
            return Err(AllocError::InvalidArgument(
                "byte offset must be at least 1".to_string(),
            ));
        }
        if byte_offset > extent.length {
            return Err(AllocError::OffsetOutOfRange {
                offset: byte_offset,
                length: extent.length,
            });
        }

        Ok(Lookup {
            block: extent.start + self.translator.bytes_to_blocks(byte_offset) - 1,
            hops: 0,
        })
    }

    fn extend(&mut self, file_id: FileId, extra_blocks: usize) -> Result<()> {
        let extent = self.lookup(file_id)?;

        if extra_blocks < 1 {
            return Err(AllocError::InvalidArgument(
                "extension must be at least 1 block".to_string(),
            ));
        }
        if self.capacity < extra_blocks {
            return Err(AllocError::InsufficientCapacity {
                requested: extra_blocks,
                available: self.capacity,
            });
        }

        let new_length = self
            .translator
            .blocks_to_bytes(extra_blocks)
            .and_then(|bytes| extent.length.checked_add(bytes))
            .ok_or_else(|| {
                AllocError::InvalidArgument(format!(
                    "extending file {} by {} blocks overflows its byte length",
                    file_id, extra_blocks
                ))
            })?;

        let held = self.held_blocks(&extent);
        let mut end = extent.start + held;

        if !self.blocks.run_is_free(end, extra_blocks) {
            self.compact();
            end = self.defragment(file_id)? + held;

            if !self.blocks.run_is_free(end, extra_blocks) {
                return Err(self.bookkeeping_defect(format!(
                    "file {} cannot grow by {} blocks after defragmentation with {} free",
                    file_id, extra_blocks, self.capacity
                )));
            }
        }

        self.blocks
            .fill(end..end + extra_blocks, ExtentBlock::Owned(file_id));
        if let Some(entry) = self.files.get_mut(&file_id) {
            entry.length = new_length;
        }
        self.capacity -= extra_blocks;
        self.size += extra_blocks;

        debug!("Extended file {} by {} blocks", file_id, extra_blocks);
        Ok(())
    }

    fn shrink(&mut self, file_id: FileId, shrink_blocks: usize) -> Result<()> {
        let extent = self.lookup(file_id)?;

        if shrink_blocks < 1 {
            return Err(AllocError::InvalidArgument(
                "shrink must be at least 1 block".to_string(),
            ));
        }

        let held = self.held_blocks(&extent);
        if held.saturating_sub(shrink_blocks) <= 1 {
            return Err(AllocError::ShrinkTooLarge {
                requested: shrink_blocks,
                held,
            });
        }

        let end = extent.start + held;
        self.blocks.fill(end - shrink_blocks..end, ExtentBlock::Free);

        let block_size = self.translator.block_size();
        let k = shrink_blocks as u64;
        let remainder = extent.length % block_size;
        let delta = if remainder == 0 {
            k * block_size
        } else {
            k * (block_size - 1) + remainder
        };

        // The new length must still round to exactly the retained blocks
        let retained = (held - shrink_blocks) as u64;
        let new_length = extent
            .length
            .saturating_sub(delta)
            .clamp((retained - 1) * block_size + 1, retained * block_size);

        if let Some(entry) = self.files.get_mut(&file_id) {
            entry.length = new_length;
        }
        self.capacity += shrink_blocks;
        self.size -= shrink_blocks;

        debug!(
            "Shrunk file {} by {} blocks ({} -> {} bytes)",
            file_id, shrink_blocks, extent.length, new_length
        );
        Ok(())
    }

    fn delete(&mut self, file_id: FileId) -> Result<()> {
        let extent = self
            .files
            .remove(&file_id)
            .ok_or(AllocError::UnknownFile(file_id))?;
        let held = self.held_blocks(&extent);

        self.blocks
            .fill(extent.start..extent.start + held, ExtentBlock::Free);
        self.capacity += held;
        self.size -= held;

        debug!("Deleted file {}, released {} blocks", file_id, held);
        Ok(())
    }

    fn blocks_used(&self, file_id: FileId) -> Result<usize> {
        self.lookup(file_id).map(|extent| self.held_blocks(&extent))
    }

    fn contains(&self, file_id: FileId) -> bool {
        self.files.contains_key(&file_id)
    }

    fn file_count(&self) -> usize {
        self.files.len()
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

    fn block_size(&self) -> u64 {
        self.translator.block_size()
    }

    fn strategy(&self) -> Strategy {
        Strategy::Contiguous
    }

    fn fragmentation_score(&self) -> f64 {
        fragmentation_from_runs(&self.blocks.free_runs(0..self.blocks.len()))
    }

    fn check_consistency(&self) -> Result<()> {
        let total = self.blocks.len();

        if self.capacity + self.size != total {
            return Err(AllocError::Inconsistent(format!(
                "capacity {} + size {} != {} blocks",
                self.capacity, self.size, total
            )));
        }

        let free = self.blocks.count_free(0..total);
        if free != self.capacity {
            return Err(AllocError::Inconsistent(format!(
                "{} free blocks in store, capacity says {}",
                free, self.capacity
            )));
        }

        let mut held_total = 0usize;
        for (&id, extent) in &self.files {
            let held = self.held_blocks(extent);
            let end = extent.start + held;
            if end > total {
                return Err(AllocError::Inconsistent(format!(
                    "file {} extent {}..{} runs past the volume",
                    id, extent.start, end
                )));
            }
            if let Some(i) = (extent.start..end)
                .find(|&i| self.blocks.get(i) != ExtentBlock::Owned(id))
            {
                return Err(AllocError::Inconsistent(format!(
                    "block {} inside file {} is {:?}",
                    i,
                    id,
                    self.blocks.get(i)
                )));
            }
            held_total += held;
        }

        if held_total != self.size {
            return Err(AllocError::Inconsistent(format!(
                "files hold {} blocks, size says {}",
                held_total, self.size
            )));
        }

        Ok(())
    }
}
