// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutine slots.
//!
//! A slot is a reusable execution context: a stack, a status, a display
//! name and the body waiting to run. Slots are owned by the scheduler's
//! arena and addressed by [`CoroutineId`]; they are recycled through the
//! idle pool and only unmapped at teardown.

use std::fmt;

use crate::context::Stack;
use crate::future::Pending;
use crate::scheduler::Scheduler;

/// Names longer than this many bytes are cut (at a char boundary).
pub const MAX_NAME_LEN: usize = 31;

/// Entry function of a spawned coroutine. Arguments travel as captures.
pub(crate) type Body = Box<dyn FnOnce(&Scheduler)>;

/// Index of a coroutine slot in the runtime that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoroutineId(pub(crate) usize);

impl CoroutineId {
    /// The synthetic coroutine standing for the thread that ran setup.
    pub const MAIN: CoroutineId = CoroutineId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for CoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Coroutine lifecycle.
///
/// `Idle -> Ready -> Running`, then `Running` leaves to `Ready` (yield),
/// `Blocked` (block), `Sleeping` (sleep) or `Idle` (body returned).
/// `Blocked` and `Sleeping` only go back to `Ready` through a wake.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// In the idle pool, no body assigned.
    Idle = 0,
    /// Currently executing. Exactly one coroutine is in this state.
    Running = 1,
    /// Has a ready future in the ready queue.
    Ready = 2,
    /// Parked until some future it owns is woken.
    Blocked = 3,
    /// Parked until its timer fires.
    Sleeping = 4,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Idle => "IDLE",
            Status::Running => "RUNNING",
            Status::Ready => "READY",
            Status::Blocked => "BLOCKED",
            Status::Sleeping => "SLEEPING",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Longest prefix of `name` that fits in [`MAX_NAME_LEN`] bytes.
pub(crate) fn truncate_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    let mut end = MAX_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

pub(crate) struct Coroutine {
    pub name: String,
    pub status: Status,
    /// `None` only for the main coroutine, which runs on the thread stack.
    pub stack: Option<Stack>,
    /// Taken by the entry point when the coroutine first runs.
    pub body: Option<Body>,
    /// The one outstanding wait token, if any.
    pub pending: Option<Pending>,
}

impl Coroutine {
    pub fn main() -> Self {
        Self {
            name: "main".to_string(),
            status: Status::Running,
            stack: None,
            body: None,
            pending: None,
        }
    }

    pub fn with_stack(stack: Stack) -> Self {
        Self {
            name: String::with_capacity(MAX_NAME_LEN),
            status: Status::Idle,
            stack: Some(stack),
            body: None,
            pending: None,
        }
    }

    /// Prepare a recycled or fresh slot for a new body.
    pub fn assign(&mut self, name: &str, body: Body) {
        self.name.clear();
        self.name.push_str(truncate_name(name));
        self.body = Some(body);
        self.pending = None;
        self.status = Status::Ready;
    }

    /// Return the slot to its idle state after the body finished.
    pub fn retire(&mut self) {
        self.status = Status::Idle;
        self.pending = None;
        self.body = None;
    }
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("has_stack", &self.stack.is_some())
            .field("pending", &self.pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_kept() {
        assert_eq!(truncate_name("worker"), "worker");
        assert_eq!(truncate_name(""), "");
    }

    #[test]
    fn long_names_cut_to_width() {
        let long = "127.0.0.1:54321-connection-handler-with-a-long-name";
        let cut = truncate_name(long);
        assert_eq!(cut.len(), MAX_NAME_LEN);
        assert!(long.starts_with(cut));
    }

    #[test]
    fn cut_respects_char_boundaries() {
        // 30 ASCII bytes followed by a 3-byte char straddling the limit.
        let name = format!("{}€tail", "a".repeat(30));
        let cut = truncate_name(&name);
        assert_eq!(cut, "a".repeat(30));
    }

    #[test]
    fn assign_and_retire() {
        let stack = Stack::new(16 * 1024).unwrap();
        let mut co = Coroutine::with_stack(stack);
        assert_eq!(co.status, Status::Idle);
        co.assign("job", Box::new(|_| {}));
        assert_eq!(co.status, Status::Ready);
        assert_eq!(co.name, "job");
        assert!(co.body.is_some());
        co.retire();
        assert_eq!(co.status, Status::Idle);
        assert!(co.body.is_none());
        assert_eq!(Status::Sleeping.to_string(), "SLEEPING");
    }
}
