// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime errors.
//!
//! Two families: [`Error`] is what `setup` and `spawn` hand back to the
//! caller. [`Violation`] is a broken usage contract; the runtime logs it,
//! dumps diagnostics and panics, it is never returned.

use std::io;

use thiserror::Error;

use crate::coroutine::Status;

/// Recoverable failure of `setup` or `spawn`.
#[derive(Debug, Error)]
pub enum Error {
    /// Stack mapping or container storage could not be obtained.
    #[error("failed to allocate {what}: {source}")]
    AllocationFailure {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    /// Every coroutine slot up to the configured maximum is in use.
    #[error("coroutine limit reached ({max} concurrent coroutines)")]
    CapacityExceeded { max: usize },

    /// Setup called with a bad configuration or while a runtime is live.
    #[error("invalid runtime state: {reason}")]
    InvalidState { reason: &'static str },
}

impl Error {
    pub(crate) fn storage(what: &'static str, err: std::collections::TryReserveError) -> Self {
        Error::AllocationFailure {
            what,
            source: io::Error::new(io::ErrorKind::OutOfMemory, err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A contract violation. Unreachable under correct use; fatal when hit.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Violation {
    #[error("future of coroutine `{name}` woken twice (already ready)")]
    DoubleWake { name: String },

    #[error("future of coroutine `{name}` is stale: it was superseded or already consumed")]
    StaleFuture { name: String },

    #[error("coroutine `{name}` has no saved continuation to resume")]
    MissingContinuation { name: String },

    #[error("no ready coroutine to hand off to during {during}")]
    NoReadyCoroutine { during: &'static str },

    #[error("cannot clear block on coroutine `{name}`: it is {status}, not BLOCKED")]
    NotBlocked { name: String, status: Status },

    #[error("{queue} overflowed its fixed capacity")]
    QueueOverflow { queue: &'static str },

    #[error("teardown called from coroutine `{name}`; only the main coroutine may tear down")]
    TeardownOffMain { name: String },

    #[error("coroutine entry point ran without a spawner to hand back to")]
    MissingSpawner,

    #[error("unknown coroutine id {id}")]
    UnknownCoroutine { id: usize },
}
