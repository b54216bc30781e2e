// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Continuation capture and restore.
//!
//! This is the only place the runtime touches processor state. A
//! continuation is the saved stack pointer of a suspended flow; the
//! callee-saved registers and the resume address sit on that flow's own
//! stack just below it, pushed by [`switch`].
//!
//! Contract:
//! - [`prepare`] lays an initial frame on an unused stack so that switching
//!   to the returned continuation calls `entry(arg)` on that stack.
//! - [`switch`] captures the running flow into a [`ContinuationCell`] and
//!   restores another continuation. It returns only when something later
//!   restores what it captured.
//! - [`jump`] restores a continuation and never returns.
//! - A cell is emptied when its continuation is taken, so a continuation
//!   can be resumed at most once.

use std::cell::Cell;
use std::ptr::{self, NonNull};

mod stack;

#[cfg_attr(target_arch = "x86_64", path = "x86_64.rs")]
#[cfg_attr(target_arch = "aarch64", path = "aarch64.rs")]
mod arch;

#[cfg(not(all(unix, any(target_arch = "x86_64", target_arch = "aarch64"))))]
compile_error!("coro-rt supports x86_64 and aarch64 Unix targets only");

pub(crate) use stack::{page_size, Stack};

/// Function a fresh stack starts in. Must never return: there is no frame
/// to return to.
pub(crate) type Entry = extern "C" fn(*mut ()) -> !;

/// Opaque resume point of a suspended flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct Continuation(NonNull<u8>);

/// Holds at most one continuation. The running flow's cell is empty.
#[derive(Debug)]
pub(crate) struct ContinuationCell(Cell<*mut u8>);

impl ContinuationCell {
    pub const fn empty() -> Self {
        Self(Cell::new(ptr::null_mut()))
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.0.get().is_null()
    }

    /// Remove the continuation so it cannot be resumed again.
    pub fn take(&self) -> Option<Continuation> {
        NonNull::new(self.0.replace(ptr::null_mut())).map(Continuation)
    }

    #[cfg(test)]
    pub fn put(&self, cont: Continuation) {
        self.0.set(cont.0.as_ptr());
    }

    pub fn clear(&self) {
        self.0.set(ptr::null_mut());
    }
}

impl Default for ContinuationCell {
    fn default() -> Self {
        Self::empty()
    }
}

/// Lay the initial frame for `entry(arg)` at the top of `stack`.
///
/// # Safety
/// No live frame may be using `stack`: the initial frame overwrites its top.
pub(crate) unsafe fn prepare(stack: &Stack, entry: Entry, arg: *mut ()) -> Continuation {
    Continuation(arch::prepare(stack.top(), entry, arg))
}

/// Capture the running flow into `save` and resume `to`.
///
/// # Safety
/// `to` must come from [`prepare`] or from a capture that has not been
/// resumed yet, and the stack it lives on must still be mapped. `save` must
/// stay at the same address until whoever resumes it has read it, which
/// happens before that flow runs.
pub(crate) unsafe fn switch(save: &ContinuationCell, to: Continuation) {
    arch::switch(save.0.as_ptr(), to.0.as_ptr());
}

/// Resume `to`, abandoning the running flow.
///
/// # Safety
/// Same requirements on `to` as [`switch`]. Nothing on the abandoned stack
/// is dropped.
pub(crate) unsafe fn jump(to: Continuation) -> ! {
    let discard = ContinuationCell::empty();
    switch(&discard, to);
    // Nobody holds `discard`, so control cannot come back here.
    std::process::abort()
}
