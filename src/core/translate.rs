//! Byte to block address translation
//!
//! Every length and offset conversion in both allocators goes through
//! [`AddressTranslator::bytes_to_blocks`], so rounding is identical everywhere.

use crate::error::{AllocError, Result};
use serde::{Deserialize, Serialize};

/// Converts byte counts into block counts for a fixed block size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressTranslator {
    block_size: u64,
}

impl AddressTranslator {
    /// Create a translator for `block_size` bytes per block
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `block_size` is zero.
    pub fn new(block_size: u64) -> Result<Self> {
        if block_size == 0 {
            return Err(AllocError::InvalidArgument(
                "block size must be at least 1 byte".to_string(),
            ));
        }
        Ok(AddressTranslator { block_size })
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Number of blocks needed to hold `bytes` bytes (ceiling division)
    ///
    /// ```
    /// use blockalloc_rs::AddressTranslator;
    ///
    /// let t = AddressTranslator::new(5).unwrap();
    /// assert_eq!(t.bytes_to_blocks(0), 0);
    /// assert_eq!(t.bytes_to_blocks(1), 1);
    /// assert_eq!(t.bytes_to_blocks(5), 1);
    /// assert_eq!(t.bytes_to_blocks(6), 2);
    /// ```
    pub fn bytes_to_blocks(&self, bytes: u64) -> usize {
        bytes.div_ceil(self.block_size) as usize
    }

    /// Bytes spanned by `blocks` whole blocks, `None` past `u64::MAX`
    pub fn blocks_to_bytes(&self, blocks: usize) -> Option<u64> {
        (blocks as u64).checked_mul(self.block_size)
    }
}
