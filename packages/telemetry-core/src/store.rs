// Registry of per-channel sample buffers
//
// The single ingestion point for a decoded stream. Buffers are created lazily
// on the first sample for a key and live until `clear()`.

use crate::error::{TelemetryError, TelemetryResult};
use crate::series::{Sample, TimeSeriesBuffer};
use crate::types::{ChannelKey, SourceId};
use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Thread-safe handle to one channel buffer
pub type SharedSeries = Arc<Mutex<TimeSeriesBuffer>>;

/// Copied contents of one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub key: ChannelKey,
    pub timestamps: Vec<f64>,
    pub values: Vec<f64>,
}

/// Keyed collection of channel buffers
///
/// Registry mutations go through a re-entrant lock: `append` holds it while
/// calling `get_or_create`, which takes it again. Each buffer has its own
/// mutex so readers copy channel data out without tearing the ring.
pub struct ChannelBufferStore {
    capacity: NonZeroUsize,
    channels: ReentrantMutex<RefCell<BTreeMap<ChannelKey, SharedSeries>>>,
}

impl ChannelBufferStore {
    /// Create a store whose channels each hold `capacity` samples
    pub fn new(capacity: usize) -> TelemetryResult<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| TelemetryError::config("channel buffer capacity must be > 0"))?;
        Ok(Self {
            capacity,
            channels: ReentrantMutex::new(RefCell::new(BTreeMap::new())),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Existing buffer for `key`, or a freshly registered one
    pub fn get_or_create(&self, key: &ChannelKey) -> SharedSeries {
        let guard = self.channels.lock();
        let existing = guard.borrow().get(key).cloned();
        if let Some(buffer) = existing {
            return buffer;
        }

        let buffer = Arc::new(Mutex::new(TimeSeriesBuffer::with_capacity(self.capacity)));
        guard.borrow_mut().insert(key.clone(), Arc::clone(&buffer));
        log::debug!("Registered channel {}", key);
        buffer
    }

    /// Buffer for `key` if it has been registered
    pub fn get(&self, key: &ChannelKey) -> Option<SharedSeries> {
        let guard = self.channels.lock();
        let found = guard.borrow().get(key).cloned();
        found
    }

    /// Append one sample, registering the channel on first use
    pub fn append(&self, key: &ChannelKey, timestamp: f64, value: f64) {
        let _serialized = self.channels.lock();
        let buffer = self.get_or_create(key);
        buffer.lock().append(timestamp, value);
    }

    /// Stable copy of the `(key, buffer)` pairs
    ///
    /// The returned handles stay valid while ingestion continues.
    pub fn items(&self) -> Vec<(ChannelKey, SharedSeries)> {
        let guard = self.channels.lock();
        let items = guard
            .borrow()
            .iter()
            .map(|(key, buffer)| (key.clone(), Arc::clone(buffer)))
            .collect();
        items
    }

    pub fn keys(&self) -> Vec<ChannelKey> {
        let guard = self.channels.lock();
        let keys = guard.borrow().keys().cloned().collect();
        keys
    }

    /// Copied data of every channel
    pub fn snapshot(&self) -> Vec<ChannelSnapshot> {
        self.items()
            .into_iter()
            .map(|(key, buffer)| {
                let (timestamps, values) = buffer.lock().to_arrays();
                ChannelSnapshot {
                    key,
                    timestamps,
                    values,
                }
            })
            .collect()
    }

    /// Trailing `seconds` of one channel, empty when the channel is unknown
    pub fn read_window(&self, key: &ChannelKey, seconds: f64) -> (Vec<f64>, Vec<f64>) {
        match self.get(key) {
            Some(buffer) => buffer.lock().get_recent(seconds),
            None => (Vec::new(), Vec::new()),
        }
    }

    /// Newest sample of one channel
    pub fn latest(&self, key: &ChannelKey) -> Option<Sample> {
        self.get(key).and_then(|buffer| buffer.lock().latest())
    }

    /// Newest timestamp across all channels, optionally of a single source
    pub fn latest_timestamp(&self, source_id: Option<&SourceId>) -> Option<f64> {
        self.items()
            .into_iter()
            .filter(|(key, _)| source_id.map_or(true, |id| &key.source_id == id))
            .filter_map(|(_, buffer)| buffer.lock().latest_timestamp())
            .fold(None, |acc: Option<f64>, ts| Some(acc.map_or(ts, |a| a.max(ts))))
    }

    pub fn len(&self) -> usize {
        let guard = self.channels.lock();
        let len = guard.borrow().len();
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every channel
    pub fn clear(&self) {
        let guard = self.channels.lock();
        guard.borrow_mut().clear();
    }
}
