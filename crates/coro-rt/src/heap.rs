// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Quaternary min-heap keyed by `u64`.
//!
//! Parent of `i` is `(i - 1) / 4`; children are `4i + 1 ..= 4i + 4`.
//! Capacity is fixed: a full heap rejects the push rather than growing.

use std::collections::TryReserveError;

const ARITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeapEntry<T> {
    pub key: u64,
    pub value: T,
}

pub(crate) struct QuadHeap<T> {
    nodes: Vec<HeapEntry<T>>,
    capacity: usize,
}

impl<T> QuadHeap<T> {
    pub fn with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        let mut nodes = Vec::new();
        nodes.try_reserve_exact(capacity)?;
        Ok(Self { nodes, capacity })
    }

    /// Insert an entry. Returns it back if the heap is full.
    pub fn push(&mut self, key: u64, value: T) -> Result<(), HeapEntry<T>> {
        let entry = HeapEntry { key, value };
        if self.nodes.len() == self.capacity {
            return Err(entry);
        }
        self.nodes.push(entry);
        self.sift_up(self.nodes.len() - 1);
        Ok(())
    }

    /// Entry with the smallest key.
    pub fn peek(&self) -> Option<&HeapEntry<T>> {
        self.nodes.first()
    }

    /// Remove and return the entry with the smallest key.
    pub fn pop(&mut self) -> Option<HeapEntry<T>> {
        if self.nodes.is_empty() {
            return None;
        }
        let root = self.nodes.swap_remove(0);
        if !self.nodes.is_empty() {
            self.sift_down(0);
        }
        Some(root)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / ARITY;
            if self.nodes[parent].key <= self.nodes[i].key {
                break;
            }
            self.nodes.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.nodes.len();
        loop {
            let first = ARITY * i + 1;
            let last = (first + ARITY).min(len);
            let mut min = i;
            for child in first..last {
                if self.nodes[child].key < self.nodes[min].key {
                    min = child;
                }
            }
            if min == i {
                break;
            }
            self.nodes.swap(i, min);
            i = min;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(heap: &mut QuadHeap<u32>) -> Vec<u64> {
        std::iter::from_fn(|| heap.pop().map(|e| e.key)).collect()
    }

    #[test]
    fn pops_in_ascending_order() {
        let mut heap = QuadHeap::with_capacity(64).unwrap();
        let keys = [42u64, 7, 19, 3, 88, 3, 61, 0, 15, 27, 99, 1, 54, 12, 8, 70];
        for (i, &k) in keys.iter().enumerate() {
            heap.push(k, i as u32).unwrap();
        }
        let mut expected = keys.to_vec();
        expected.sort_unstable();
        assert_eq!(drain(&mut heap), expected);
        assert_eq!(heap.len(), 0);
    }

    #[test]
    fn peek_tracks_minimum() {
        let mut heap = QuadHeap::with_capacity(8).unwrap();
        assert!(heap.peek().is_none());
        heap.push(30, 'a').unwrap();
        assert_eq!(heap.peek().map(|e| e.value), Some('a'));
        heap.push(10, 'b').unwrap();
        heap.push(20, 'c').unwrap();
        assert_eq!(heap.peek().map(|e| (e.key, e.value)), Some((10, 'b')));
        assert_eq!(heap.pop().map(|e| e.value), Some('b'));
        assert_eq!(heap.peek().map(|e| e.value), Some('c'));
    }

    #[test]
    fn full_heap_rejects_without_growing() {
        let mut heap = QuadHeap::with_capacity(2).unwrap();
        heap.push(5, 0u32).unwrap();
        heap.push(1, 1).unwrap();
        let rejected = heap.push(0, 2).unwrap_err();
        assert_eq!(rejected.key, 0);
        assert_eq!(heap.len(), 2);
        assert_eq!(drain(&mut heap), vec![1, 5]);
    }

    #[test]
    fn interleaved_push_pop() {
        let mut heap = QuadHeap::with_capacity(32).unwrap();
        heap.push(50, 0u32).unwrap();
        heap.push(40, 0).unwrap();
        assert_eq!(heap.pop().map(|e| e.key), Some(40));
        for k in [45, 5, 60, 25, 35] {
            heap.push(k, 0).unwrap();
        }
        assert_eq!(heap.pop().map(|e| e.key), Some(5));
        heap.push(1, 0).unwrap();
        assert_eq!(drain(&mut heap), vec![1, 25, 35, 45, 50, 60]);
    }
}
