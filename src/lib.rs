//! VenomBuffer - blocking bounded buffer in shared memory
//!
//! A fixed-capacity buffer of `i32` that any number of processes or threads
//! can produce into and consume from. Producers block while it is full,
//! consumers while it is empty.
//!
//! # Architecture
//!
//! - **Region**: an anonymous `MAP_SHARED` mapping (shared with `fork`ed
//!   children) or a named POSIX shared memory object (shared by name)
//! - **Counters**: three process-shared semaphores in the mapping, one lock
//!   and two counting semaphores for free and filled slots
//! - **Discipline**: FIFO (ring) or LIFO (stack), fixed at creation
//!
//! # Example
//!
//! ```
//! use venom_buffer::{Mode, SharedBuffer};
//!
//! let buffer = SharedBuffer::create(3, Mode::Fifo)?;
//! buffer.put_all([10, 20, 30]);
//! assert_eq!(buffer.take_many(3), vec![10, 20, 30]);
//! buffer.destroy();
//! # Ok::<(), venom_buffer::BufferError>(())
//! ```

pub mod error;
pub mod mode;
pub mod semaphore;
pub mod shm;
pub mod buffer;
pub mod bindings;

pub use error::{BufferError, Result};
pub use mode::Mode;
pub use buffer::{BufferConfig, SharedBuffer};
