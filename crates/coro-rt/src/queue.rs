// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Bounded circular FIFO.
//!
//! Backs the ready queue, the idle pool and the coroutine registry. Capacity
//! is fixed at construction; a full queue hands the item back instead of
//! dropping it, so the caller decides whether overflow is fatal.

use std::collections::TryReserveError;

/// Fixed-capacity ring buffer. Slots are `Option<T>` so popped entries
/// release whatever they own immediately.
pub(crate) struct RingQueue<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    len: usize,
}

impl<T> RingQueue<T> {
    /// Allocate a queue holding at most `capacity` items.
    ///
    /// Storage is reserved fallibly so setup can report allocation failure
    /// instead of aborting.
    pub fn with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity)?;
        slots.resize_with(capacity, || None);
        Ok(Self {
            slots: slots.into_boxed_slice(),
            head: 0,
            len: 0,
        })
    }

    /// Push at the back. Returns the item if the queue is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        let tail = (self.head + self.len) % self.slots.len();
        self.slots[tail] = Some(item);
        self.len += 1;
        Ok(())
    }

    /// Pop from the front.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        item
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Iterate front to back without consuming.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let cap = self.slots.len();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % cap].as_ref())
    }
}

impl<T> std::fmt::Debug for RingQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingQueue")
            .field("len", &self.len)
            .field("capacity", &self.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_fifo() {
        let mut q = RingQueue::with_capacity(4).unwrap();
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.push(3).unwrap();
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert!(q.is_empty());
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn overflow_hands_item_back() {
        let mut q = RingQueue::with_capacity(2).unwrap();
        q.push("a").unwrap();
        q.push("b").unwrap();
        assert!(q.is_full());
        assert_eq!(q.push("c"), Err("c"));
        // Nothing was lost or overwritten.
        assert_eq!(q.pop(), Some("a"));
        assert_eq!(q.pop(), Some("b"));
    }

    #[test]
    fn wraps_around() {
        let mut q = RingQueue::with_capacity(3).unwrap();
        for round in 0..10 {
            q.push(round).unwrap();
            q.push(round + 100).unwrap();
            assert_eq!(q.pop(), Some(round));
            assert_eq!(q.pop(), Some(round + 100));
        }
        assert!(q.is_empty());
        assert_eq!(q.capacity(), 3);
    }

    #[test]
    fn iter_front_to_back() {
        let mut q = RingQueue::with_capacity(3).unwrap();
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.pop();
        q.push(3).unwrap();
        q.push(4).unwrap();
        let seen: Vec<_> = q.iter().copied().collect();
        assert_eq!(seen, vec![2, 3, 4]);
    }

    #[test]
    fn zero_capacity_rejects_everything() {
        let mut q = RingQueue::with_capacity(0).unwrap();
        assert!(q.is_full());
        assert_eq!(q.push(7), Err(7));
        assert_eq!(q.pop(), None);
    }
}
