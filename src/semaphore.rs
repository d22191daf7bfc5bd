//! Process-shared POSIX semaphores
//!
//! The buffer uses three of these: a binary one as the cursor lock and two
//! counting ones for free and filled slots. They live inside the shared
//! mapping and are initialized with `pshared = 1`, so forked children and
//! processes attaching to a named region all block on the same kernel object.

use std::cell::UnsafeCell;
use std::io;

/// A `sem_t` placed in shared memory
#[repr(C)]
pub struct Semaphore {
    raw: UnsafeCell<libc::sem_t>,
}

// SAFETY: sem_t operations are thread- and process-safe by contract
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// Initialize a semaphore in place
    ///
    /// # Safety
    /// `ptr` must point to writable, properly aligned memory that outlives every
    /// user of the semaphore and is not already an initialized semaphore.
    pub unsafe fn init(ptr: *mut Self, value: u32) -> io::Result<()> {
        let raw = UnsafeCell::raw_get(std::ptr::addr_of!((*ptr).raw));
        if libc::sem_init(raw, 1, value) != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[inline(always)]
    fn raw(&self) -> *mut libc::sem_t {
        self.raw.get()
    }

    /// Decrement, blocking while the value is zero
    ///
    /// Interrupted waits are retried.
    #[inline]
    pub fn wait(&self) {
        loop {
            // SAFETY: initialized by `init` before any handle is handed out
            if unsafe { libc::sem_wait(self.raw()) } == 0 {
                return;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                panic!("sem_wait failed on a live buffer: {err}");
            }
        }
    }

    /// Decrement if the value is positive, without blocking
    #[inline]
    pub fn try_wait(&self) -> bool {
        loop {
            // SAFETY: see `wait`
            if unsafe { libc::sem_trywait(self.raw()) } == 0 {
                return true;
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return false,
                _ => panic!("sem_trywait failed on a live buffer: {err}"),
            }
        }
    }

    /// Increment, waking one waiter
    #[inline]
    pub fn post(&self) {
        // SAFETY: see `wait`
        if unsafe { libc::sem_post(self.raw()) } != 0 {
            panic!("sem_post failed on a live buffer: {}", io::Error::last_os_error());
        }
    }

    /// Current value
    ///
    /// Racy by nature; exact only while no one else touches the semaphore.
    pub fn value(&self) -> usize {
        let mut value: libc::c_int = 0;
        // SAFETY: see `wait`
        if unsafe { libc::sem_getvalue(self.raw(), &mut value) } != 0 {
            panic!("sem_getvalue failed on a live buffer: {}", io::Error::last_os_error());
        }
        // glibc never reports waiters as a negative value, other libcs might
        value.max(0) as usize
    }

    /// Acquire as a lock, releasing on drop
    #[inline]
    pub fn lock(&self) -> SemaphoreGuard<'_> {
        self.wait();
        SemaphoreGuard { sem: self }
    }

    /// Destroy the semaphore
    ///
    /// # Safety
    /// No process may wait on or use the semaphore afterwards.
    pub unsafe fn destroy(&self) {
        libc::sem_destroy(self.raw());
    }
}

/// Holds a binary semaphore until dropped
pub struct SemaphoreGuard<'a> {
    sem: &'a Semaphore,
}

impl Drop for SemaphoreGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.sem.post();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn boxed(value: u32) -> Box<Semaphore> {
        let mut sem = Box::new(std::mem::MaybeUninit::<Semaphore>::uninit());
        unsafe {
            Semaphore::init(sem.as_mut_ptr(), value).unwrap();
            Box::from_raw(Box::into_raw(sem).cast::<Semaphore>())
        }
    }

    #[test]
    fn test_counting() {
        let sem = boxed(2);
        assert_eq!(sem.value(), 2);
        assert!(sem.try_wait());
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
        sem.post();
        assert_eq!(sem.value(), 1);
        unsafe { sem.destroy() };
    }

    #[test]
    fn test_guard_releases() {
        let sem = boxed(1);
        {
            let _guard = sem.lock();
            assert_eq!(sem.value(), 0);
        }
        assert_eq!(sem.value(), 1);
        unsafe { sem.destroy() };
    }

    #[test]
    fn test_wait_blocks_until_post() {
        let sem = boxed(0);
        let woke = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| {
                sem.wait();
                woke.store(true, Ordering::SeqCst);
            });

            thread::sleep(Duration::from_millis(50));
            assert!(!woke.load(Ordering::SeqCst));
            sem.post();
        });

        assert!(woke.load(Ordering::SeqCst));
        unsafe { sem.destroy() };
    }
}
