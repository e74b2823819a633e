// Fixed-capacity circular buffer
//
// Slots are reserved once at construction. Appends overwrite the oldest
// element when full, so memory use stays constant for the life of a stream.

use crate::error::{TelemetryError, TelemetryResult};
use std::num::NonZeroUsize;

/// Circular buffer with oldest-overwrite semantics
///
/// Logical positions are chronological: `0` is the oldest element and `-1`
/// the newest. Not synchronized; wrap it in a lock to share between threads.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    capacity: usize,
    // Physical index of the oldest element once the buffer has wrapped
    start: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> TelemetryResult<Self> {
        NonZeroUsize::new(capacity)
            .map(Self::with_capacity)
            .ok_or_else(|| TelemetryError::config("ring buffer capacity must be > 0"))
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity.get()),
            capacity: capacity.get(),
            start: 0,
        }
    }

    /// Append an element, evicting the oldest one when full. O(1).
    pub fn append(&mut self, item: T) {
        if self.slots.len() < self.capacity {
            self.slots.push(item);
        } else {
            self.slots[self.start] = item;
            self.start = (self.start + 1) % self.capacity;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Element at a logical position (negative counts back from the newest)
    pub fn get(&self, index: isize) -> TelemetryResult<&T> {
        let size = self.slots.len();
        let logical = if index < 0 {
            size as isize + index
        } else {
            index
        };
        if logical < 0 || logical as usize >= size {
            return Err(TelemetryError::IndexOutOfRange { index, size });
        }
        Ok(&self.slots[(self.start + logical as usize) % size])
    }

    /// Oldest element, if any
    pub fn first(&self) -> Option<&T> {
        self.get(0).ok()
    }

    /// Newest element, if any
    pub fn last(&self) -> Option<&T> {
        self.get(-1).ok()
    }

    /// Iterate from oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        let (wrapped, head) = self.slots.split_at(self.start);
        head.iter().chain(wrapped.iter())
    }

    /// Drop every element while keeping the reserved slots
    pub fn clear(&mut self) {
        self.slots.clear();
        self.start = 0;
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copy of the most recent `min(n, len)` elements in chronological order
    pub fn get_last(&self, n: usize) -> Vec<T> {
        let take = n.min(self.slots.len());
        self.iter()
            .skip(self.slots.len() - take)
            .cloned()
            .collect()
    }

    /// Copy of the full contents in chronological order
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(RingBuffer::<u32>::new(0).is_err());
    }

    #[test]
    fn test_overflow_keeps_last_pushed_in_order() {
        let mut ring = RingBuffer::new(4).unwrap();
        for i in 0..11 {
            ring.append(i);
        }
        assert_eq!(ring.len(), 4);
        assert!(ring.is_full());
        assert_eq!(ring.to_vec(), vec![7, 8, 9, 10]);
    }

    #[test]
    fn test_get_last_with_fewer_elements() {
        let mut ring = RingBuffer::new(8).unwrap();
        ring.append(1.0);
        ring.append(2.0);
        ring.append(3.0);

        assert_eq!(ring.get_last(10), vec![1.0, 2.0, 3.0]);
        assert_eq!(ring.get_last(2), vec![2.0, 3.0]);
        assert!(ring.get_last(0).is_empty());
    }

    #[test]
    fn test_logical_indexing_through_wrap() {
        let mut ring = RingBuffer::new(3).unwrap();
        for i in 1..=5 {
            ring.append(i);
        }
        // Contents are [3, 4, 5] with the physical start in the middle
        assert_eq!(*ring.get(0).unwrap(), 3);
        assert_eq!(*ring.get(2).unwrap(), 5);
        assert_eq!(*ring.get(-1).unwrap(), 5);
        assert_eq!(*ring.get(-3).unwrap(), 3);
        assert!(ring.get(3).is_err());
        assert!(ring.get(-4).is_err());
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut ring = RingBuffer::new(2).unwrap();
        ring.append("a");
        ring.append("b");
        ring.append("c");
        ring.clear();

        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), 2);
        assert!(ring.last().is_none());

        ring.append("d");
        assert_eq!(ring.to_vec(), vec!["d"]);
    }
}
