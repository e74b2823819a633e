// Lossless chunked persistence
//
// Raw samples are grouped into fixed-size chunks and handed to a
// `SampleWriter`. A chunk that fails to write stays queued and is retried
// first on the next call. While the backlog is full, new batches are refused
// with `RecorderBackpressure` before any of their samples are taken, so the
// caller still owns them and can offer them again.

use super::{SampleSink, SinkMetrics};
use crate::error::{TelemetryError, TelemetryResult};
use crate::writer::{SampleWriter, WriterConfig};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub enabled: bool,
    pub chunk_seconds: f64,
    /// Failed chunks held for retry before new batches are refused
    pub max_pending_chunks: usize,
    pub output: Option<WriterConfig>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            chunk_seconds: 1.0,
            max_pending_chunks: 64,
            output: None,
        }
    }
}

impl RecorderConfig {
    pub fn validate(&self) -> TelemetryResult<()> {
        if !(self.chunk_seconds.is_finite() && self.chunk_seconds > 0.0) {
            return Err(TelemetryError::config(format!(
                "chunk_seconds must be > 0, got {}",
                self.chunk_seconds
            )));
        }
        if self.max_pending_chunks == 0 {
            return Err(TelemetryError::config("max_pending_chunks must be > 0"));
        }
        Ok(())
    }

    /// `max(1, floor(chunk_seconds * sensor_fs))`
    pub fn chunk_size(&self, sensor_fs: f64) -> usize {
        // Absorb representation error such as 0.04 * 100 = 3.9999...
        let exact = self.chunk_seconds * sensor_fs;
        ((exact + 1e-9).floor() as usize).max(1)
    }
}

struct Chunk {
    timestamps: Vec<f64>,
    values: Vec<f64>,
}

pub struct RecorderSink {
    writer: Box<dyn SampleWriter>,
    chunk_size: usize,
    max_pending: usize,
    current_ts: Vec<f64>,
    current_vals: Vec<f64>,
    backlog: VecDeque<Chunk>,
    metrics: Arc<SinkMetrics>,
}

impl RecorderSink {
    pub fn new(
        sensor_fs: f64,
        config: &RecorderConfig,
        writer: Box<dyn SampleWriter>,
        metrics: Arc<SinkMetrics>,
    ) -> TelemetryResult<Self> {
        config.validate()?;
        let chunk_size = config.chunk_size(sensor_fs);
        log::debug!(
            "Recorder writing {}-sample chunks to {}",
            chunk_size,
            writer.name()
        );
        Ok(Self {
            writer,
            chunk_size,
            max_pending: config.max_pending_chunks,
            current_ts: Vec::with_capacity(chunk_size),
            current_vals: Vec::with_capacity(chunk_size),
            backlog: VecDeque::new(),
            metrics,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Full chunks not yet persisted
    pub fn pending_chunks(&self) -> usize {
        self.backlog.len()
    }

    /// Samples waiting for a full chunk
    pub fn buffered_samples(&self) -> usize {
        self.current_vals.len()
    }

    fn seal_current(&mut self) {
        let timestamps = std::mem::replace(&mut self.current_ts, Vec::with_capacity(self.chunk_size));
        let values = std::mem::replace(&mut self.current_vals, Vec::with_capacity(self.chunk_size));
        self.backlog.push_back(Chunk { timestamps, values });
    }

    // Oldest first; stops at the first failure so chunk order is preserved
    fn drain_backlog(&mut self) {
        while let Some(chunk) = self.backlog.front() {
            match self.writer.write_samples(&chunk.timestamps, &chunk.values) {
                Ok(()) => {
                    SinkMetrics::add(&self.metrics.chunks_written, 1);
                    self.backlog.pop_front();
                }
                Err(e) => {
                    SinkMetrics::add(&self.metrics.write_failures, 1);
                    log::warn!(
                        "Recorder write to {} failed ({} chunks pending): {}",
                        self.writer.name(),
                        self.backlog.len(),
                        e
                    );
                    break;
                }
            }
        }
    }

    // An empty backlog takes any batch, so one oversized batch cannot wedge the sink
    fn has_room(&self, len: usize) -> TelemetryResult<()> {
        let sealed = (self.current_vals.len() + len) / self.chunk_size;
        if !self.backlog.is_empty() && self.backlog.len() + sealed > self.max_pending {
            return Err(TelemetryError::RecorderBackpressure {
                pending: self.backlog.len(),
            });
        }
        Ok(())
    }
}

impl SampleSink for RecorderSink {
    /// Retry the backlog, then refuse if the batch would overfill it
    fn admit(&mut self, len: usize) -> TelemetryResult<()> {
        self.drain_backlog();
        self.has_room(len)
    }

    fn handle(&mut self, timestamps: &[f64], values: &[f64]) -> TelemetryResult<()> {
        self.has_room(values.len())
            .or_else(|_| self.admit(values.len()))?;
        SinkMetrics::add(&self.metrics.batches, 1);
        SinkMetrics::add(&self.metrics.samples_in, values.len() as u64);

        let mut offset = 0;
        while offset < values.len() {
            let room = self.chunk_size - self.current_vals.len();
            let end = (offset + room).min(values.len());
            self.current_ts.extend_from_slice(&timestamps[offset..end]);
            self.current_vals.extend_from_slice(&values[offset..end]);
            offset = end;
            if self.current_vals.len() == self.chunk_size {
                self.seal_current();
            }
        }

        self.drain_backlog();
        Ok(())
    }

    /// Write the partial chunk and any retained chunks
    fn flush(&mut self) -> TelemetryResult<()> {
        if !self.current_vals.is_empty() {
            self.seal_current();
        }
        self.drain_backlog();
        if !self.backlog.is_empty() {
            return Err(TelemetryError::Writer(format!(
                "{} chunks could not be written to {}",
                self.backlog.len(),
                self.writer.name()
            )));
        }
        self.writer.flush()
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}
