// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Sleep deadlines.
//!
//! Deadlines are nanoseconds since the runtime's [`Clock`] anchor, kept in a
//! fixed-capacity 4-ary min-heap. Entries with equal deadlines come out in
//! heap order, not insertion order.

use std::collections::TryReserveError;
use std::time::{Duration, Instant};

use crate::future::Token;
use crate::heap::QuadHeap;

/// Monotonic clock anchored at runtime setup.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Clock {
    anchor: Instant,
}

impl Clock {
    pub fn start() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }

    pub fn now_ns(&self) -> u64 {
        saturating_ns(self.anchor.elapsed())
    }
}

fn saturating_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

pub(crate) struct Timers {
    heap: QuadHeap<Token>,
}

impl Timers {
    pub fn with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        Ok(Self {
            heap: QuadHeap::with_capacity(capacity)?,
        })
    }

    /// Schedule `token` to fire `after` from `now`. Gives it back when full.
    pub fn insert(&mut self, now: u64, after: Duration, token: Token) -> Result<(), Token> {
        let deadline = now.saturating_add(saturating_ns(after));
        self.heap.push(deadline, token).map_err(|rejected| rejected.value)
    }

    /// Next entry whose deadline is at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: u64) -> Option<Token> {
        match self.heap.peek() {
            Some(top) if top.key <= now => self.heap.pop().map(|e| e.value),
            _ => None,
        }
    }

    /// Time until the earliest deadline; `None` when nothing is scheduled.
    pub fn min_wait(&self, now: u64) -> Option<Duration> {
        self.heap
            .peek()
            .map(|top| Duration::from_nanos(top.key.saturating_sub(now)))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::CoroutineId;

    fn tok(co: usize) -> Token {
        Token {
            co: CoroutineId(co),
            seq: co as u64,
        }
    }

    #[test]
    fn due_in_deadline_order() {
        let mut timers = Timers::with_capacity(8).unwrap();
        timers.insert(0, Duration::from_millis(30), tok(1)).unwrap();
        timers.insert(0, Duration::from_millis(10), tok(2)).unwrap();
        timers.insert(0, Duration::from_millis(20), tok(3)).unwrap();

        assert_eq!(timers.pop_due(5_000_000), None);
        let now = 25_000_000;
        assert_eq!(timers.pop_due(now), Some(tok(2)));
        assert_eq!(timers.pop_due(now), Some(tok(3)));
        assert_eq!(timers.pop_due(now), None);
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn min_wait_bounds() {
        let mut timers = Timers::with_capacity(2).unwrap();
        assert_eq!(timers.min_wait(0), None);
        timers.insert(100, Duration::from_nanos(50), tok(1)).unwrap();
        assert_eq!(timers.min_wait(120), Some(Duration::from_nanos(30)));
        assert_eq!(timers.min_wait(500), Some(Duration::ZERO));
    }

    #[test]
    fn full_heap_rejects() {
        let mut timers = Timers::with_capacity(1).unwrap();
        timers.insert(0, Duration::ZERO, tok(1)).unwrap();
        assert_eq!(timers.insert(0, Duration::ZERO, tok(2)), Err(tok(2)));
    }

    #[test]
    fn clock_is_monotonic() {
        let clock = Clock::start();
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
    }
}
