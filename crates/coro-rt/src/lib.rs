// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Single-threaded stackful coroutine runtime.
//!
//! Each coroutine runs on its own mmap'd stack and suspends only at
//! explicit points: [`Scheduler::yield_now`], [`Scheduler::block`],
//! [`Scheduler::sleep`], and the handshake inside [`Scheduler::spawn`].
//! An external event loop drives the runtime through three calls:
//! [`Scheduler::min_wait_time`] for its poll timeout,
//! [`Scheduler::wake`] when something a coroutine waits on becomes ready,
//! and [`Scheduler::dispatch`] to run whatever is ready.
//!
//! Components:
//! - context: stacks and register-swap continuations
//! - queue / heap: fixed-capacity FIFO and 4-ary min-heap
//! - scheduler: ready queue, idle pool, registry, status machine
//! - timer: sleep deadlines
//! - future: wait tokens
//! - runtime: setup/teardown bracket
//!
//! ```no_run
//! use std::time::Duration;
//! use coro_rt::Runtime;
//!
//! let rt = Runtime::setup(16).unwrap();
//! rt.spawn("napper", |s| {
//!     s.sleep(Duration::from_millis(10));
//!     println!("woke up");
//! })
//! .unwrap();
//! while rt.diagnostics().stacks_mapped > rt.diagnostics().idle {
//!     if let Some(wait) = rt.min_wait_time() {
//!         std::thread::sleep(wait);
//!     }
//!     rt.dispatch();
//! }
//! rt.teardown();
//! ```

mod config;
mod context;
mod coroutine;
mod diagnostics;
mod error;
mod future;
mod heap;
mod queue;
mod runtime;
mod scheduler;
mod timer;

pub use config::{
    Config, DEFAULT_MAX_CONCURRENCY, DEFAULT_STACK_SIZE, ENV_MAX_CONCURRENCY, ENV_STACK_SIZE,
    MIN_STACK_SIZE,
};
pub use coroutine::{CoroutineId, Status, MAX_NAME_LEN};
pub use diagnostics::{CoroutineInfo, Diagnostics};
pub use error::{Error, Result, Violation};
pub use future::CoFuture;
pub use runtime::Runtime;
pub use scheduler::Scheduler;
