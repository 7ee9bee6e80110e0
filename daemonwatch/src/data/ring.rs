//! Fixed-size window of the most recent values.
//!
//! The buffer is pre-filled with `T::default()`, so `len()` always equals the
//! capacity. Index 0 is the oldest retained value and `len() - 1` the newest.

use std::ops::Index;

#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buf: Vec<T>,
    cap: usize,
    // Physical slot of the oldest value; also the next slot to overwrite.
    idx: usize,
}

impl<T: Default + Clone> RingBuffer<T> {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.max(1);
        Self {
            buf: vec![T::default(); cap],
            cap,
            idx: 0,
        }
    }
}

impl<T> RingBuffer<T> {
    /// Evicts the oldest value and appends `value` as the newest.
    pub fn push(&mut self, value: T) {
        self.buf[self.idx] = value;
        self.idx = (self.idx + 1) % self.cap;
    }

    pub fn len(&self) -> usize {
        self.cap
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn get(&self, i: usize) -> Option<&T> {
        if i >= self.cap {
            return None;
        }
        Some(&self.buf[(self.idx + i) % self.cap])
    }

    pub fn oldest(&self) -> &T {
        &self.buf[self.idx]
    }

    pub fn newest(&self) -> &T {
        &self.buf[(self.idx + self.cap - 1) % self.cap]
    }

    /// Oldest-first iteration.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        let (tail, head) = self.buf.split_at(self.idx);
        head.iter().chain(tail.iter())
    }
}

impl<T> Index<usize> for RingBuffer<T> {
    type Output = T;

    fn index(&self, i: usize) -> &T {
        assert!(i < self.cap, "index {} out of range for ring of {}", i, self.cap);
        &self.buf[(self.idx + i) % self.cap]
    }
}
