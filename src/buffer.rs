//! Fixed-capacity ring buffer.
//!
//! Holds events, breadcrumbs and performance samples. Once full, every
//! push evicts exactly one oldest element. Pushes never fail.
//!
//! # Example
//!
//! ```
//! use territory_telemetry::buffer::RingBuffer;
//!
//! let mut buffer = RingBuffer::new(2);
//! buffer.push(1);
//! buffer.push(2);
//! buffer.push(3);
//! assert_eq!(buffer.to_vec(), vec![3, 2]);
//! ```

use std::collections::VecDeque;

/// Insertion-ordered store with oldest-first eviction.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` items.
    ///
    /// A capacity of zero is corrected to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            tracing::warn!("Ring buffer capacity 0 corrected to 1");
            1
        } else {
            capacity
        };
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an item, evicting the oldest one when full.
    ///
    /// Returns the evicted item, if any.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Remove every item.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Number of items currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number of items.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// Contiguous view of every item, oldest first.
    pub fn make_contiguous(&mut self) -> &[T] {
        self.items.make_contiguous()
    }

    /// Find the newest item matching `predicate`.
    pub fn find_mut(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Option<&mut T> {
        self.items.iter_mut().rev().find(|item| predicate(item))
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copy out every item, newest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().rev().cloned().collect()
    }

    /// Copy out the newest `n` items, oldest first.
    #[must_use]
    pub fn latest(&self, n: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).cloned().collect()
    }
}
