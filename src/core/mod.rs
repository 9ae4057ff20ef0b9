//! Allocation engines and the pieces they share

pub mod allocator;
pub mod block;
pub mod config;
pub mod error;
pub mod translate;

/// Caller-chosen file identifier
pub type FileId = u64;

/// Position of a block within the volume
pub type BlockIndex = usize;
