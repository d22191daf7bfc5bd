//! Shared memory regions backing a buffer
//!
//! Anonymous regions are inherited by `fork`ed children; named regions live in
//! POSIX shared memory so unrelated processes can attach by name.

use crate::error::{BufferError, Result};
use rustix::fd::OwnedFd;
use rustix::fs::ftruncate;
use rustix::mm::{mmap, mmap_anonymous, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::ffi::CString;
use std::ptr::NonNull;

const SHM_PREFIX: &str = "/venom_buf_";
const MAX_NAME_LEN: usize = 255 - SHM_PREFIX.len();

/// A `MAP_SHARED` mapping, unmapped on drop
pub struct ShmRegion {
    #[allow(dead_code)]
    fd: Option<OwnedFd>,
    addr: NonNull<u8>,
    size: usize,
    name: Option<String>,
    is_owner: bool,
}

// SAFETY: the mapping is plain memory; everything stored in it is
// synchronized by process-shared semaphores
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

fn shm_path(name: &str) -> Result<CString> {
    if name.len() > MAX_NAME_LEN {
        return Err(BufferError::NameTooLong {
            max: MAX_NAME_LEN,
            got: name.len(),
        });
    }
    CString::new(format!("{}{}", SHM_PREFIX, name))
        .map_err(|_| BufferError::allocation(format!("shared memory name {name:?} contains NUL")))
}

impl ShmRegion {
    /// Map an anonymous shared region of `size` zeroed bytes
    ///
    /// A failed mapping is reported as [`BufferError::Allocation`].
    pub fn anonymous(size: usize) -> Result<Self> {
        let addr = unsafe {
            mmap_anonymous(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
            )
            .map_err(|e| BufferError::allocation(format!("mmap of {size} bytes failed: {e}")))?
        };
        let addr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| BufferError::allocation("mmap returned null"))?;

        tracing::debug!(size, "Mapped anonymous shared region");

        Ok(Self {
            fd: None,
            addr,
            size,
            name: None,
            is_owner: true,
        })
    }

    /// Create a new named shared memory region
    ///
    /// Fails if a region with this name already exists; attaching to a live
    /// buffer must go through [`ShmRegion::open`].
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let c_name = shm_path(name)?;

        let fd = shm_open(
            c_name.as_c_str(),
            ShmOFlags::CREATE | ShmOFlags::EXCL | ShmOFlags::RDWR,
            Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP,
        )
        .map_err(|e| BufferError::ShmCreate {
            name: name.to_string(),
            source: e.into(),
        })?;

        // Unlink if anything below fails
        let unlink_on_err = |err: BufferError| {
            let _ = shm_unlink(c_name.as_c_str());
            err
        };

        ftruncate(&fd, size as u64).map_err(|e| unlink_on_err(BufferError::Truncate(e.into())))?;

        let addr = Self::map_fd(&fd, size).map_err(unlink_on_err)?;

        // ftruncate already zero-fills, but be explicit about it
        unsafe {
            std::ptr::write_bytes(addr.as_ptr(), 0, size);
        }

        tracing::debug!(name = %name, size, "Created named shared region");

        Ok(Self {
            fd: Some(fd),
            addr,
            size,
            name: Some(name.to_string()),
            is_owner: true,
        })
    }

    /// Open an existing named shared memory region
    pub fn open(name: &str) -> Result<Self> {
        let c_name = shm_path(name)?;

        let fd = shm_open(c_name.as_c_str(), ShmOFlags::RDWR, Mode::empty()).map_err(|e| {
            BufferError::ShmOpen {
                name: name.to_string(),
                source: e.into(),
            }
        })?;

        let stat = rustix::fs::fstat(&fd).map_err(|e| BufferError::ShmOpen {
            name: name.to_string(),
            source: e.into(),
        })?;
        let size = stat.st_size as usize;

        let addr = Self::map_fd(&fd, size)?;

        tracing::debug!(name = %name, size, "Opened named shared region");

        Ok(Self {
            fd: Some(fd),
            addr,
            size,
            name: Some(name.to_string()),
            is_owner: false,
        })
    }

    fn map_fd(fd: &OwnedFd, size: usize) -> Result<NonNull<u8>> {
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                fd,
                0,
            )
            .map_err(|e| BufferError::Mmap(e.into()))?
        };
        NonNull::new(addr.cast::<u8>()).ok_or_else(|| BufferError::allocation("mmap returned null"))
    }

    /// Get raw pointer to the mapping
    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    /// Size of the mapping in bytes
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Name of a named region, `None` for anonymous ones
    #[inline(always)]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether this handle created the region
    #[inline(always)]
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        if let Err(err) = unsafe { munmap(self.addr.as_ptr().cast(), self.size) } {
            tracing::error!(name = ?self.name, error = %err, "Failed to unmap shared region");
        }

        if let (true, Some(name)) = (self.is_owner, self.name.as_deref()) {
            if let Ok(c_name) = shm_path(name) {
                let _ = shm_unlink(c_name.as_c_str());
                tracing::debug!(name = %name, "Unlinked named shared region");
            }
        }
    }
}
