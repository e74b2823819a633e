// Bounded drop-oldest handoff queue
//
// Producers never block: when the queue is full the oldest pending item is
// evicted to make room. Used between the pipeline sinks and their consumers,
// where recency matters more than completeness.

use crate::error::{TelemetryError, TelemetryResult};
use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Counters for queue monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub total_pushed: u64,
    pub total_popped: u64,
    pub total_dropped: u64,
    pub current_size: usize,
    pub peak_size: usize,
    pub capacity: usize,
}

struct Counters {
    pushed: AtomicU64,
    popped: AtomicU64,
    dropped: AtomicU64,
    peak: AtomicUsize,
}

/// Lock-free multi-producer/multi-consumer queue with drop-oldest overflow
///
/// Clones share the same storage and counters.
pub struct DropOldestQueue<T> {
    items: Arc<ArrayQueue<T>>,
    counters: Arc<Counters>,
}

impl<T> Clone for DropOldestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> TelemetryResult<Self> {
        if capacity == 0 {
            return Err(TelemetryError::config("queue capacity must be > 0"));
        }
        Ok(Self {
            items: Arc::new(ArrayQueue::new(capacity)),
            counters: Arc::new(Counters {
                pushed: AtomicU64::new(0),
                popped: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                peak: AtomicUsize::new(0),
            }),
        })
    }

    /// Enqueue, evicting and returning the oldest item when full
    pub fn push(&self, item: T) -> Option<T> {
        let evicted = self.items.force_push(item);
        self.counters.pushed.fetch_add(1, Ordering::Relaxed);
        if evicted.is_some() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.counters
            .peak
            .fetch_max(self.items.len(), Ordering::Relaxed);
        evicted
    }

    pub fn pop(&self) -> Option<T> {
        self.items.pop().map(|item| {
            self.counters.popped.fetch_add(1, Ordering::Relaxed);
            item
        })
    }

    /// Pop up to `max_items`, oldest first
    pub fn drain(&self, max_items: usize) -> Vec<T> {
        let mut items = Vec::with_capacity(max_items.min(self.items.len()));
        while items.len() < max_items {
            match self.pop() {
                Some(item) => items.push(item),
                None => break,
            }
        }
        items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            total_pushed: self.counters.pushed.load(Ordering::Relaxed),
            total_popped: self.counters.popped.load(Ordering::Relaxed),
            total_dropped: self.counters.dropped.load(Ordering::Relaxed),
            current_size: self.items.len(),
            peak_size: self.counters.peak.load(Ordering::Relaxed),
            capacity: self.items.capacity(),
        }
    }

    pub fn clear(&self) {
        while self.items.pop().is_some() {}
    }
}
