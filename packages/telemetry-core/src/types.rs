// Common types shared across ingestion, storage and the session controller

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a physical sensor as reported in the stream
///
/// Records may carry either an integer or a string id; both are kept as-is so
/// that `1` and `"1"` stay distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceId {
    Int(i64),
    Text(String),
}

impl SourceId {
    /// Id used for records that carry no `sensor_id`
    pub fn unspecified() -> Self {
        SourceId::Text("default".to_string())
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::unspecified()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Int(id) => write!(f, "{}", id),
            SourceId::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for SourceId {
    fn from(id: i64) -> Self {
        SourceId::Int(id)
    }
}

impl From<i32> for SourceId {
    fn from(id: i32) -> Self {
        SourceId::Int(id as i64)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        SourceId::Text(id.to_string())
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        SourceId::Text(id)
    }
}

/// Key of one logical channel: `(source id, channel name)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    pub source_id: SourceId,
    pub channel: String,
}

impl ChannelKey {
    pub fn new(source_id: impl Into<SourceId>, channel: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            channel: channel.into(),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_id, self.channel)
    }
}

/// Current state of an ingestion session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", content = "data")]
pub enum StreamState {
    /// Created but not started
    #[default]
    Idle,

    /// Waiting for the line source to connect
    Connecting,

    /// Reader loop is consuming lines
    Running { started_at: f64 },

    /// Input ended on its own
    Finished,

    /// Source or reader failed
    Error { message: String },

    /// Stopped on request
    Stopped,
}

/// Point-in-time copy of the reader loop counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestStats {
    pub lines_read: u64,
    pub records_dispatched: u64,
    pub samples_appended: u64,
    pub malformed_lines: u64,
    pub records_without_timestamp: u64,
    pub dropped_fields: u64,
    pub status_reports: u64,
    pub pipeline_errors: u64,
}

/// Lock-free counters updated by the reader loop
#[derive(Debug, Default)]
pub struct IngestCounters {
    pub lines_read: AtomicU64,
    pub records_dispatched: AtomicU64,
    pub samples_appended: AtomicU64,
    pub malformed_lines: AtomicU64,
    pub records_without_timestamp: AtomicU64,
    pub dropped_fields: AtomicU64,
    pub status_reports: AtomicU64,
    pub pipeline_errors: AtomicU64,
}

impl IngestCounters {
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestStats {
        IngestStats {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            records_dispatched: self.records_dispatched.load(Ordering::Relaxed),
            samples_appended: self.samples_appended.load(Ordering::Relaxed),
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
            records_without_timestamp: self.records_without_timestamp.load(Ordering::Relaxed),
            dropped_fields: self.dropped_fields.load(Ordering::Relaxed),
            status_reports: self.status_reports.load(Ordering::Relaxed),
            pipeline_errors: self.pipeline_errors.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.lines_read,
            &self.records_dispatched,
            &self.samples_appended,
            &self.malformed_lines,
            &self.records_without_timestamp,
            &self.dropped_fields,
            &self.status_reports,
            &self.pipeline_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_keeps_int_and_text_distinct() {
        let a = ChannelKey::new(1, "ax");
        let b = ChannelKey::new("1", "ax");
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "1:ax");
        assert_eq!(b.to_string(), "1:ax");
    }

    #[test]
    fn test_source_id_untagged_serde() {
        let int: SourceId = serde_json::from_str("7").unwrap();
        let text: SourceId = serde_json::from_str("\"imu-left\"").unwrap();
        assert_eq!(int, SourceId::Int(7));
        assert_eq!(text, SourceId::from("imu-left"));
    }

    #[test]
    fn test_state_serializes_tagged() {
        let json = serde_json::to_string(&StreamState::Running { started_at: 1.5 }).unwrap();
        assert!(json.contains("\"type\":\"Running\""));
        assert!(json.contains("started_at"));
    }
}
