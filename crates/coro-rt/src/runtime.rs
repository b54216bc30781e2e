// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime lifecycle: setup and teardown.
//!
//! A [`Runtime`] owns the scheduler on the heap so its address stays fixed
//! while coroutine stacks point at it. The thread that calls setup becomes
//! the main coroutine. At most one runtime is live per OS thread.

use std::cell::Cell;
use std::ops::Deref;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::scheduler::Scheduler;

thread_local! {
    static ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// The live runtime of this thread. Derefs to [`Scheduler`].
///
/// Dropping it tears down like [`teardown`](Runtime::teardown).
pub struct Runtime {
    sched: Box<Scheduler>,
    torn_down: bool,
}

impl Runtime {
    /// Set up with `max_concurrency` coroutines and default stacks.
    ///
    /// # Errors
    /// [`Error::InvalidState`] for a zero capacity or when this thread
    /// already has a live runtime; [`Error::AllocationFailure`] when the
    /// containers cannot be allocated.
    pub fn setup(max_concurrency: usize) -> Result<Self> {
        Self::with_config(Config::new(max_concurrency))
    }

    pub fn with_config(config: Config) -> Result<Self> {
        let config = config.validated()?;
        if ACTIVE.with(Cell::get) {
            return Err(Error::InvalidState {
                reason: "a runtime is already set up on this thread",
            });
        }
        let sched = Box::new(Scheduler::new(config)?);
        ACTIVE.with(|active| active.set(true));
        log::debug!(
            "runtime set up: max_concurrency={} stack_size={}",
            config.max_concurrency,
            config.stack_size
        );
        Ok(Self {
            sched,
            torn_down: false,
        })
    }

    /// Release every coroutine stack and the runtime's containers.
    ///
    /// Must run on the main coroutine. Coroutines still suspended are
    /// discarded without their destructors running. Returns the number of
    /// stacks unmapped.
    pub fn teardown(mut self) -> usize {
        self.shutdown()
    }

    fn shutdown(&mut self) -> usize {
        if self.torn_down {
            return 0;
        }
        self.torn_down = true;
        let unmapped = self.sched.shutdown();
        ACTIVE.with(|active| active.set(false));
        log::debug!("runtime torn down, {unmapped} stacks unmapped");
        unmapped
    }
}

impl Deref for Runtime {
    type Target = Scheduler;

    fn deref(&self) -> &Scheduler {
        &self.sched
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", self.sched.config())
            .field("torn_down", &self.torn_down)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::{CoroutineId, Status};

    #[test]
    fn main_is_running_after_setup() {
        let rt = Runtime::setup(4).unwrap();
        assert_eq!(rt.current(), CoroutineId::MAIN);
        assert_eq!(rt.status(CoroutineId::MAIN), Some(Status::Running));
        assert_eq!(rt.diagnostics().total, 1);
        assert_eq!(rt.teardown(), 0);
    }

    #[test]
    fn second_setup_on_thread_rejected() {
        let rt = Runtime::setup(2).unwrap();
        let err = Runtime::setup(2).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        drop(rt);
        // Dropping the first releases the thread.
        Runtime::setup(2).unwrap().teardown();
    }

    #[test]
    fn zero_capacity_rejected() {
        assert!(matches!(
            Runtime::setup(0),
            Err(Error::InvalidState { .. })
        ));
    }
}
