//! Retrieval disciplines
//!
//! The buffer keeps its cursors in shared memory and hands them to one of two
//! disciplines while the lock is held. [`Mode`] is the only place the choice is
//! made; the rest of the crate talks to a [`Discipline`].

use crate::error::BufferError;
use std::fmt;

/// Retrieval mode, fixed at creation.
///
/// The numeric values match the external mapping: `LIFO = 0`, `FIFO = 1`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    /// Most recently inserted value is removed first
    Lifo = 0,
    /// Values are removed in insertion order
    #[default]
    Fifo = 1,
}

impl Mode {
    /// The cursor algorithm for this mode
    #[inline]
    pub fn discipline(self) -> &'static dyn Discipline {
        match self {
            Mode::Fifo => &Fifo,
            Mode::Lifo => &Lifo,
        }
    }
}

impl TryFrom<i64> for Mode {
    type Error = BufferError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Mode::Lifo),
            1 => Ok(Mode::Fifo),
            other => Err(BufferError::InvalidMode(other)),
        }
    }
}

impl From<Mode> for u8 {
    fn from(mode: Mode) -> Self {
        mode as u8
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Fifo => f.write_str("FIFO"),
            Mode::Lifo => f.write_str("LIFO"),
        }
    }
}

/// Cursor pair stored in the shared header.
///
/// Only touched while the buffer lock is held.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursors {
    /// Last written slot, `None` until the first write (or after LIFO drains it)
    pub write: Option<usize>,
    /// Next slot to read in FIFO mode
    pub read: usize,
}

impl Cursors {
    pub const fn new() -> Self {
        Self {
            write: None,
            read: 0,
        }
    }
}

impl Default for Cursors {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the next write lands and where the next read comes from.
///
/// Callers guarantee through the free/filled counters that `next_write` is
/// never called on a full buffer and `next_read` never on an empty one.
pub trait Discipline: Send + Sync {
    /// Advance the write cursor and return the slot to store into
    fn next_write(&self, cursors: &mut Cursors, capacity: usize) -> usize;

    /// Return the slot to read from and move the cursors past it
    fn next_read(&self, cursors: &mut Cursors, capacity: usize) -> usize;

    /// Annotation for slot `index` in a diagnostic dump
    fn annotate(&self, cursors: &Cursors, index: usize) -> Option<&'static str>;
}

/// Ring discipline: writes and reads chase each other around the slots.
pub struct Fifo;

impl Discipline for Fifo {
    #[inline]
    fn next_write(&self, cursors: &mut Cursors, capacity: usize) -> usize {
        let slot = match cursors.write {
            Some(last) => (last + 1) % capacity,
            None => 0,
        };
        cursors.write = Some(slot);
        slot
    }

    #[inline]
    fn next_read(&self, cursors: &mut Cursors, capacity: usize) -> usize {
        let slot = cursors.read;
        cursors.read = (slot + 1) % capacity;
        slot
    }

    fn annotate(&self, cursors: &Cursors, index: usize) -> Option<&'static str> {
        if cursors.write == Some(index) {
            Some(" <-- write")
        } else if cursors.read == index {
            Some(" <-- read")
        } else {
            None
        }
    }
}

/// Stack discipline: the write cursor is the top of the stack.
pub struct Lifo;

impl Discipline for Lifo {
    #[inline]
    fn next_write(&self, cursors: &mut Cursors, _capacity: usize) -> usize {
        let slot = cursors.write.map_or(0, |top| top + 1);
        cursors.write = Some(slot);
        slot
    }

    #[inline]
    fn next_read(&self, cursors: &mut Cursors, _capacity: usize) -> usize {
        // filled_count > 0 means the stack has a top
        debug_assert!(cursors.write.is_some(), "LIFO read from an empty stack");
        let top = cursors.write.unwrap_or(0);
        cursors.write = top.checked_sub(1);
        top
    }

    fn annotate(&self, cursors: &Cursors, index: usize) -> Option<&'static str> {
        (cursors.write == Some(index)).then_some(" <-- write (read)")
    }
}
