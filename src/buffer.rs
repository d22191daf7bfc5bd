//! Bounded shared buffer
//!
//! A fixed number of `i32` slots in a shared mapping, guarded by three
//! process-shared semaphores: `empty` counts free slots, `full` counts filled
//! slots and `mutex` serializes cursor updates. Producers block while the
//! buffer is full, consumers while it is empty.
//!
//! # Layout
//!
//! ```text
//! +----------------------------+ 0
//! | BufferHeader               |
//! |   magic, mode, capacity    |
//! |   cursors                  |
//! |   mutex / empty / full     |
//! +----------------------------+ SLOTS_OFFSET (cache line aligned)
//! | slots[0..capacity]: i32    |
//! +----------------------------+
//! ```
//!
//! # Lifetime
//!
//! Every process that maps the region shares it. Dropping a handle only
//! unmaps it locally. [`SharedBuffer::destroy`] additionally tears down the
//! semaphores, so it must be the last use of the buffer in every process.
//! Calling it while others still block on the buffer is undefined behavior;
//! nothing here tracks other attachers.

use crate::error::{BufferError, Result};
use crate::mode::{Cursors, Discipline, Mode};
use crate::semaphore::Semaphore;
use crate::shm::ShmRegion;
use std::cell::UnsafeCell;
use std::fmt::{self, Write};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

/// Magic number for buffer validation
const BUFFER_MAGIC: u32 = 0x5642_5546; // "VBUF"

/// Cache line size
const CACHE_LINE_SIZE: usize = 64;

/// Default capacity in slots
const DEFAULT_CAPACITY: usize = 64;

const SLOTS_OFFSET: usize =
    (std::mem::size_of::<BufferHeader>() + CACHE_LINE_SIZE - 1) & !(CACHE_LINE_SIZE - 1);

/// Buffer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    /// Number of slots
    pub capacity: usize,
    /// Retrieval order
    pub mode: Mode,
    /// POSIX shared memory name; `None` maps an anonymous region that is
    /// shared with `fork`ed children only
    pub name: Option<String>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            mode: Mode::default(),
            name: None,
        }
    }
}

/// Buffer header stored at the beginning of the mapping
#[repr(C)]
struct BufferHeader {
    /// Zero until the creator has initialized everything else
    magic: AtomicU32,
    mode: u8,
    capacity: usize,
    cursors: UnsafeCell<Cursors>,
    mutex: Semaphore,
    empty: Semaphore,
    full: Semaphore,
}

impl BufferHeader {
    fn total_size(capacity: usize) -> Option<usize> {
        capacity
            .checked_mul(std::mem::size_of::<i32>())?
            .checked_add(SLOTS_OFFSET)
    }
}

/// Handle to a bounded buffer of `i32` in shared memory
pub struct SharedBuffer {
    region: ShmRegion,
    header: NonNull<BufferHeader>,
    slots: NonNull<i32>,
    capacity: usize,
    mode: Mode,
    discipline: &'static dyn Discipline,
}

// SAFETY: all shared state is behind process-shared semaphores
unsafe impl Send for SharedBuffer {}
unsafe impl Sync for SharedBuffer {}

impl SharedBuffer {
    /// Create an anonymous buffer
    ///
    /// The buffer is visible to every thread holding a reference and to
    /// children `fork`ed after this call.
    pub fn create(capacity: usize, mode: Mode) -> Result<Self> {
        Self::with_config(BufferConfig {
            capacity,
            mode,
            name: None,
        })
    }

    /// Create a buffer in named shared memory that other processes can
    /// [`open`](Self::open)
    pub fn create_named(name: &str, capacity: usize, mode: Mode) -> Result<Self> {
        Self::with_config(BufferConfig {
            capacity,
            mode,
            name: Some(name.to_string()),
        })
    }

    /// Create a buffer from a full configuration
    pub fn with_config(config: BufferConfig) -> Result<Self> {
        let BufferConfig {
            capacity,
            mode,
            name,
        } = config;

        if capacity == 0 {
            return Err(BufferError::allocation("capacity must be positive"));
        }
        let free = u32::try_from(capacity)
            .map_err(|_| BufferError::allocation(format!("capacity {capacity} too large")))?;
        let total_size = BufferHeader::total_size(capacity)
            .ok_or_else(|| BufferError::allocation(format!("capacity {capacity} too large")))?;

        let region = match name.as_deref() {
            Some(name) => ShmRegion::create(name, total_size)?,
            None => ShmRegion::anonymous(total_size)?,
        };

        let header = region.as_ptr().cast::<BufferHeader>();

        unsafe {
            std::ptr::addr_of_mut!((*header).mode).write(mode.into());
            std::ptr::addr_of_mut!((*header).capacity).write(capacity);
            std::ptr::addr_of_mut!((*header).cursors).write(UnsafeCell::new(Cursors::new()));

            let sems = [
                (std::ptr::addr_of_mut!((*header).mutex), 1),
                (std::ptr::addr_of_mut!((*header).empty), free),
                (std::ptr::addr_of_mut!((*header).full), 0),
            ];
            for (sem, value) in sems {
                Semaphore::init(sem, value).map_err(|e| {
                    BufferError::allocation(format!("sem_init failed: {e}"))
                })?;
            }

            // Publish last; pairs with the Acquire load in `open`
            (*header).magic.store(BUFFER_MAGIC, Ordering::Release);
        }

        tracing::debug!(capacity, mode = %mode, name = ?name, "Created shared buffer");

        Ok(Self::from_region(region, capacity, mode))
    }

    /// Attach to a buffer created with [`create_named`](Self::create_named)
    ///
    /// Attaching while the creator is still initializing the header fails with
    /// [`BufferError::InvalidMagic`] and `got: 0`; retry in that case.
    pub fn open(name: &str) -> Result<Self> {
        let region = ShmRegion::open(name)?;
        if region.size() < SLOTS_OFFSET {
            return Err(BufferError::allocation(format!(
                "region '{name}' is {} bytes, smaller than a buffer header",
                region.size()
            )));
        }

        let header = region.as_ptr().cast::<BufferHeader>();
        let magic = unsafe { (*header).magic.load(Ordering::Acquire) };
        if magic != BUFFER_MAGIC {
            return Err(BufferError::InvalidMagic {
                expected: BUFFER_MAGIC,
                got: magic,
            });
        }
        // Everything below was written before the magic was published
        let (raw_mode, capacity) = unsafe { ((*header).mode, (*header).capacity) };
        let mode = Mode::try_from(i64::from(raw_mode))?;
        match BufferHeader::total_size(capacity) {
            Some(size) if capacity > 0 && size <= region.size() => {}
            _ => {
                return Err(BufferError::allocation(format!(
                    "region '{name}' cannot hold {capacity} slots"
                )))
            }
        }

        tracing::debug!(capacity, mode = %mode, name = %name, "Attached to shared buffer");

        Ok(Self::from_region(region, capacity, mode))
    }

    fn from_region(region: ShmRegion, capacity: usize, mode: Mode) -> Self {
        let base = region.as_ptr();
        // SAFETY: mmap never returns null and SLOTS_OFFSET is inside the mapping
        let (header, slots) = unsafe {
            (
                NonNull::new_unchecked(base.cast::<BufferHeader>()),
                NonNull::new_unchecked(base.add(SLOTS_OFFSET).cast::<i32>()),
            )
        };

        Self {
            region,
            header,
            slots,
            capacity,
            mode,
            discipline: mode.discipline(),
        }
    }

    #[inline(always)]
    fn header(&self) -> &BufferHeader {
        // SAFETY: initialized before any handle exists, lives as long as the region
        unsafe { self.header.as_ref() }
    }

    /// Store `value` in the next slot. Caller holds one unit of `empty`.
    #[inline]
    fn write_slot(&self, value: i32) {
        let header = self.header();
        {
            let _lock = header.mutex.lock();
            // SAFETY: cursors are only touched under the lock
            let cursors = unsafe { &mut *header.cursors.get() };
            let slot = self.discipline.next_write(cursors, self.capacity);
            debug_assert!(slot < self.capacity);
            unsafe { self.slots.as_ptr().add(slot).write(value) };
        }
        header.full.post();
    }

    /// Remove the next value. Caller holds one unit of `full`.
    #[inline]
    fn read_slot(&self) -> i32 {
        let header = self.header();
        let value = {
            let _lock = header.mutex.lock();
            // SAFETY: see `write_slot`
            let cursors = unsafe { &mut *header.cursors.get() };
            let slot = self.discipline.next_read(cursors, self.capacity);
            debug_assert!(slot < self.capacity);
            unsafe { self.slots.as_ptr().add(slot).read() }
        };
        header.empty.post();
        value
    }

    /// Insert a value, blocking while the buffer is full
    #[inline]
    pub fn put(&self, value: i32) {
        self.header().empty.wait();
        self.write_slot(value);
    }

    /// Insert a value if a slot is free right now
    ///
    /// Returns `false` without touching the buffer if it is full.
    #[inline]
    pub fn try_put(&self, value: i32) -> bool {
        if !self.header().empty.try_wait() {
            return false;
        }
        self.write_slot(value);
        true
    }

    /// Remove a value, blocking while the buffer is empty
    #[inline]
    pub fn take(&self) -> i32 {
        self.header().full.wait();
        self.read_slot()
    }

    /// Remove a value if one is available right now
    #[inline]
    pub fn try_take(&self) -> Option<i32> {
        if !self.header().full.try_wait() {
            return None;
        }
        Some(self.read_slot())
    }

    /// Insert every value in order
    ///
    /// Not atomic: other producers and consumers may interleave between
    /// elements.
    pub fn put_all<I>(&self, values: I)
    where
        I: IntoIterator<Item = i32>,
    {
        for value in values {
            self.put(value);
        }
    }

    /// Remove `count` values, blocking as needed
    ///
    /// Not atomic, see [`put_all`](Self::put_all).
    pub fn take_many(&self, count: usize) -> Vec<i32> {
        (0..count).map(|_| self.take()).collect()
    }

    /// List the first `n` slots with cursor annotations
    ///
    /// Holds the lock for the whole scan, so the listing is a consistent
    /// snapshot. Slots that were never written read as 0. `n` is clamped to
    /// the capacity.
    pub fn inspect(&self, n: usize) -> String {
        let header = self.header();
        let mut out = String::new();

        let _lock = header.mutex.lock();
        // SAFETY: read under the lock
        let cursors = unsafe { *header.cursors.get() };
        for index in 0..n.min(self.capacity) {
            let value = unsafe { self.slots.as_ptr().add(index).read() };
            let _ = write!(out, "{index} element: {value}");
            if let Some(note) = self.discipline.annotate(&cursors, index) {
                out.push_str(note);
            }
            out.push('\n');
        }

        out
    }

    /// Number of slots
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Retrieval mode
    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Free slots; exact only while no operation is in flight
    pub fn free_count(&self) -> usize {
        self.header().empty.value()
    }

    /// Filled slots; exact only while no operation is in flight
    pub fn filled_count(&self) -> usize {
        self.header().full.value()
    }

    /// Name of a named buffer
    pub fn name(&self) -> Option<&str> {
        self.region.name()
    }

    /// Release the buffer
    ///
    /// The creating handle also destroys the semaphores; attached handles only
    /// unmap. No process may use the buffer after its creator destroys it.
    pub fn destroy(self) {
        if self.region.is_owner() {
            let header = self.header();
            // SAFETY: caller guarantees this is the last use of the buffer
            unsafe {
                header.mutex.destroy();
                header.empty.destroy();
                header.full.destroy();
            }
        }
        tracing::debug!(
            capacity = self.capacity,
            mode = %self.mode,
            owner = self.region.is_owner(),
            "Destroyed shared buffer"
        );
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("capacity", &self.capacity)
            .field("mode", &self.mode)
            .field("name", &self.region.name())
            .field("free", &self.free_count())
            .field("filled", &self.filled_count())
            .finish()
    }
}
