use crate::core::FileId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("File already exists: {0}")]
    DuplicateFile(FileId),

    #[error("File does not exist: {0}")]
    UnknownFile(FileId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Insufficient capacity: requested {requested} blocks, {available} free")]
    InsufficientCapacity { requested: usize, available: usize },

    #[error("Offset {offset} out of range for file of {length} bytes")]
    OffsetOutOfRange { offset: u64, length: u64 },

    #[error("Shrink too large: cannot release {requested} of {held} blocks")]
    ShrinkTooLarge { requested: usize, held: usize },

    #[error("Invalid volume configuration: {0}")]
    InvalidConfig(String),

    /// Free-space accounting no longer matches the block store.
    #[error("Allocator bookkeeping is inconsistent: {0}")]
    Inconsistent(String),
}

impl AllocError {
    /// Short, stable label used when tallying rejections
    pub fn kind(&self) -> &'static str {
        match self {
            AllocError::DuplicateFile(_) => "duplicate_file",
            AllocError::UnknownFile(_) => "unknown_file",
            AllocError::InvalidArgument(_) => "invalid_argument",
            AllocError::InsufficientCapacity { .. } => "insufficient_capacity",
            AllocError::OffsetOutOfRange { .. } => "offset_out_of_range",
            AllocError::ShrinkTooLarge { .. } => "shrink_too_large",
            AllocError::InvalidConfig(_) => "invalid_config",
            AllocError::Inconsistent(_) => "inconsistent",
        }
    }
}

pub type Result<T> = std::result::Result<T, AllocError>;

/// Errors from trace handling, experiments and report export
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Allocator error: {0}")]
    Alloc(#[from] AllocError),

    #[error("Malformed trace line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;
