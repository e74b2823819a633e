// Timestamped sample buffer built on the ring buffer

use crate::error::TelemetryResult;
use crate::ring::RingBuffer;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// One raw sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds
    pub timestamp: f64,
    pub value: f64,
}

/// Fixed-capacity buffer of `(timestamp, value)` samples
///
/// Window queries binary-search on timestamp and therefore assume samples
/// were appended in non-decreasing timestamp order.
#[derive(Debug, Clone)]
pub struct TimeSeriesBuffer {
    ring: RingBuffer<Sample>,
}

impl TimeSeriesBuffer {
    pub fn new(capacity: usize) -> TelemetryResult<Self> {
        Ok(Self {
            ring: RingBuffer::new(capacity)?,
        })
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            ring: RingBuffer::with_capacity(capacity),
        }
    }

    pub fn append(&mut self, timestamp: f64, value: f64) {
        self.ring.append(Sample { timestamp, value });
    }

    /// Samples with `start <= timestamp <= end`, as parallel arrays
    pub fn get_window(&self, start: f64, end: f64) -> (Vec<f64>, Vec<f64>) {
        if self.ring.is_empty() || end < start {
            return (Vec::new(), Vec::new());
        }

        let samples = self.ring.to_vec();
        let lo = samples.partition_point(|s| s.timestamp < start);
        let hi = samples.partition_point(|s| s.timestamp <= end);
        if lo >= hi {
            return (Vec::new(), Vec::new());
        }

        samples[lo..hi]
            .iter()
            .map(|s| (s.timestamp, s.value))
            .unzip()
    }

    /// The trailing `seconds` of data, measured back from the newest sample
    pub fn get_recent(&self, seconds: f64) -> (Vec<f64>, Vec<f64>) {
        match self.latest_timestamp() {
            Some(latest) => self.get_window(latest - seconds.max(0.0), latest),
            None => (Vec::new(), Vec::new()),
        }
    }

    /// Most recent `n` samples in chronological order
    pub fn get_last(&self, n: usize) -> Vec<Sample> {
        self.ring.get_last(n)
    }

    /// Full contents as parallel arrays
    pub fn to_arrays(&self) -> (Vec<f64>, Vec<f64>) {
        self.ring.iter().map(|s| (s.timestamp, s.value)).unzip()
    }

    pub fn latest(&self) -> Option<Sample> {
        self.ring.last().copied()
    }

    pub fn latest_timestamp(&self) -> Option<f64> {
        self.ring.last().map(|s| s.timestamp)
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }
}
