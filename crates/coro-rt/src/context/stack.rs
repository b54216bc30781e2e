// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutine stacks: one anonymous private mapping each.
//!
//! The lowest page is `PROT_NONE` so running off the end faults instead of
//! scribbling over whatever is mapped below. Stacks grow down from `top()`.

use std::io;
use std::ptr::{self, NonNull};

/// Page size of the running system.
pub(crate) fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

/// An owned, page-aligned stack mapping. Unmapped on drop.
#[derive(Debug)]
pub(crate) struct Stack {
    base: NonNull<u8>,
    len: usize,
    guard: usize,
}

impl Stack {
    /// Map a stack with at least `size` usable bytes plus a guard page.
    pub fn new(size: usize) -> io::Result<Self> {
        let page = page_size();
        let len = size
            .checked_next_multiple_of(page)
            .and_then(|usable| usable.checked_add(page))
            .ok_or_else(|| io::Error::new(io::ErrorKind::OutOfMemory, "stack size overflows"))?;

        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        if unsafe { libc::mprotect(addr, page, libc::PROT_NONE) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::munmap(addr, len) };
            return Err(err);
        }

        let base = NonNull::new(addr.cast::<u8>()).ok_or_else(|| {
            io::Error::new(io::ErrorKind::OutOfMemory, "mmap returned a null mapping")
        })?;
        Ok(Self {
            base,
            len,
            guard: page,
        })
    }

    /// One past the highest usable byte.
    pub fn top(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(self.len) }
    }

    /// Lowest usable byte (just above the guard page).
    #[cfg(test)]
    pub fn bottom(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(self.guard) }
    }

    pub fn usable_size(&self) -> usize {
        self.len - self.guard
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.len);
        }
    }
}
