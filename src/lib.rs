//! # blockalloc-rs - Contiguous vs. Linked Block Allocation
//!
//! `blockalloc-rs` models the two classic ways a file system hands out the
//! blocks of a fixed-size volume:
//!
//! - **Contiguous allocation** ([`ContiguousAllocator`]): a directory table of
//!   start block + byte length per file. First-fit placement, compaction when
//!   free space is fragmented, O(1) random access.
//! - **Linked allocation** ([`LinkedAllocator`]): a file allocation table of
//!   per-block next pointers. Any free block will do, but reaching byte `n`
//!   of a file walks the chain.
//!
//! Both implement [`FileAllocator`], so the same workload can be replayed
//! against either and the outcomes compared.
//!
//! ## Quick Start
//!
//! ```rust
//! use blockalloc_rs::{ContiguousAllocator, FileAllocator, LinkedAllocator, Result};
//!
//! # fn main() -> Result<()> {
//! let mut dt = ContiguousAllocator::new(512, 1024)?;
//! dt.create_file(1, 2000)?;
//! assert_eq!(dt.access(1, 1500)?, 2);
//!
//! let mut fat = LinkedAllocator::new(512, 1024, 4)?;
//! fat.create_file(1, 2000)?;
//! let lookup = fat.locate(1, 1500)?;
//! assert_eq!(lookup.hops, 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Replaying Traces
//!
//! ```rust
//! use blockalloc_rs::{Experiment, Strategy, Trace, VolumeConfig};
//!
//! # fn main() -> blockalloc_rs::HarnessResult<()> {
//! let trace = Trace::parse("demo", "c:4096\ne:1:2\na:1:5000\nsh:1:1\n")?;
//! let config = VolumeConfig::new(1024).with_block_count(256);
//!
//! let report = Experiment::new(config)
//!     .with_repetitions(1)
//!     .run(Strategy::Linked, &trace)?;
//! assert_eq!(report.tally.rejected(), 0);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod experiment;
pub mod trace;

#[allow(unused_imports)]
pub(crate) use self::core::{allocator, block, config, error, translate};

pub use crate::core::{
    allocator::{
        contiguous::{ContiguousAllocator, FileExtent},
        linked::LinkedAllocator,
        FileAllocator, Lookup, Strategy,
    },
    block::{BlockState, BlockStore, ExtentBlock, FatEntry},
    config::VolumeConfig,
    error::{AllocError, HarnessError, HarnessResult, Result},
    translate::AddressTranslator,
    BlockIndex, FileId,
};
pub use crate::experiment::{run_trace, Experiment, ExperimentReport, OperationTally};
pub use crate::trace::{Operation, Trace, WorkloadGenerator, WorkloadSpec};
