//! Volume geometry
//!
//! A [`VolumeConfig`] fixes the block size, block count and table entry size
//! of one simulated volume. It can be built in code or loaded from TOML:
//!
//! ```toml
//! block_size = 1024
//! block_count = 32768
//! fat_entry_size = 4
//! ```

use crate::allocator::contiguous::ContiguousAllocator;
use crate::allocator::linked::{reserved_table_blocks, LinkedAllocator};
use crate::allocator::{FileAllocator, Strategy};
use crate::error::{AllocError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

/// Default number of blocks per volume
pub const DEFAULT_BLOCK_COUNT: usize = 32768;

/// Default size of one allocation table entry in bytes
pub const DEFAULT_FAT_ENTRY_SIZE: u64 = 4;

fn default_block_count() -> usize {
    DEFAULT_BLOCK_COUNT
}

fn default_fat_entry_size() -> u64 {
    DEFAULT_FAT_ENTRY_SIZE
}

/// Geometry of a simulated volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct VolumeConfig {
    /// Bytes per block
    #[validate(range(min = 1))]
    pub block_size: u64,

    /// Blocks in the volume
    #[serde(default = "default_block_count")]
    #[validate(range(min = 1))]
    pub block_count: usize,

    /// Bytes per allocation table entry (linked allocation only)
    #[serde(default = "default_fat_entry_size")]
    #[validate(range(min = 1))]
    pub fat_entry_size: u64,
}

impl VolumeConfig {
    /// Config with the default block count and entry size
    pub fn new(block_size: u64) -> Self {
        VolumeConfig {
            block_size,
            block_count: DEFAULT_BLOCK_COUNT,
            fat_entry_size: DEFAULT_FAT_ENTRY_SIZE,
        }
    }

    pub fn with_block_count(mut self, block_count: usize) -> Self {
        self.block_count = block_count;
        self
    }

    pub fn with_fat_entry_size(mut self, fat_entry_size: u64) -> Self {
        self.fat_entry_size = fat_entry_size;
        self
    }

    /// Parse a config from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: VolumeConfig =
            toml::from_str(text).map_err(|e| AllocError::InvalidConfig(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Load a config from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            AllocError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| AllocError::InvalidConfig(e.to_string()))
    }

    /// Blocks the linked allocator reserves for its table
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the table size overflows.
    pub fn reserved_table_blocks(&self) -> Result<usize> {
        reserved_table_blocks(self.block_size, self.block_count, self.fat_entry_size).ok_or_else(
            || {
                AllocError::InvalidConfig(format!(
                    "table of {} entries of {} bytes overflows",
                    self.block_count, self.fat_entry_size
                ))
            },
        )
    }

    /// Validate field ranges
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming every field out of range, or if the
    /// allocation table size overflows.
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| AllocError::InvalidConfig(e.to_string()))?;
        self.reserved_table_blocks()?;
        Ok(())
    }

    /// Build a fresh allocator for this volume
    pub fn build(&self, strategy: Strategy) -> Result<Box<dyn FileAllocator>> {
        Ok(match strategy {
            Strategy::Contiguous => Box::new(ContiguousAllocator::from_config(self)?),
            Strategy::Linked => Box::new(LinkedAllocator::from_config(self)?),
        })
    }
}
