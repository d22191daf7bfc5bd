//! Error types for the shared buffer

use std::io;
use thiserror::Error;

/// Result type for buffer operations
pub type Result<T> = std::result::Result<T, BufferError>;

/// Errors that can occur while creating or attaching to a buffer.
///
/// `put` and `take` never fail; they block instead.
#[derive(Debug, Error)]
pub enum BufferError {
    /// The buffer could not be allocated: zero capacity, size overflow or
    /// semaphore initialization failure
    #[error("Failed to allocate shared buffer: {reason}")]
    Allocation { reason: String },

    /// Numeric mode outside {0: LIFO, 1: FIFO}
    #[error("Invalid buffer mode {0}: expected 0 (LIFO) or 1 (FIFO)")]
    InvalidMode(i64),

    /// Failed to create named shared memory
    #[error("Failed to create shared memory '{name}': {source}")]
    ShmCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to open named shared memory
    #[error("Failed to open shared memory '{name}': {source}")]
    ShmOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to map memory
    #[error("Failed to map memory: {0}")]
    Mmap(#[source] io::Error),

    /// Failed to truncate shared memory
    #[error("Failed to set shared memory size: {0}")]
    Truncate(#[source] io::Error),

    /// Attached region does not hold a buffer
    #[error("Invalid buffer magic number: expected 0x{expected:08X}, got 0x{got:08X}")]
    InvalidMagic { expected: u32, got: u32 },

    /// Name too long for shm_open
    #[error("Shared memory name too long: max {max} chars, got {got}")]
    NameTooLong { max: usize, got: usize },
}

impl BufferError {
    pub(crate) fn allocation(reason: impl Into<String>) -> Self {
        Self::Allocation {
            reason: reason.into(),
        }
    }
}

impl From<BufferError> for io::Error {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::InvalidMode(_) | BufferError::NameTooLong { .. } => {
                io::Error::new(io::ErrorKind::InvalidInput, err)
            }
            other => io::Error::other(other),
        }
    }
}
