// Rate-reduced forwarding for the narrow-bandwidth channel

use super::{SampleSink, SinkMetrics, StreamPayload};
use crate::decimator::{DecimationConfig, Decimator, WindowMode};
use crate::error::{TelemetryError, TelemetryResult};
use crate::queue::DropOldestQueue;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    pub enabled: bool,
    /// Target output rate
    pub stream_fs: f64,
    pub window_mode: WindowMode,
    pub stride: Option<usize>,
    pub queue_capacity: usize,
    /// `host:port` for JSON datagrams
    pub udp_target: Option<String>,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stream_fs: 10.0,
            window_mode: WindowMode::Block,
            stride: None,
            queue_capacity: 256,
            udp_target: None,
        }
    }
}

impl StreamerConfig {
    /// Decimation settings; the streamer never carries an envelope
    pub fn decimation(&self, sensor_fs: f64) -> DecimationConfig {
        DecimationConfig {
            sensor_fs,
            plot_fs: self.stream_fs,
            use_envelope: false,
            window_mode: self.window_mode,
            smoothing_alpha: None,
            stride: self.stride,
        }
    }

    pub fn validate(&self) -> TelemetryResult<()> {
        if self.queue_capacity == 0 {
            return Err(TelemetryError::config("streamer queue_capacity must be > 0"));
        }
        Ok(())
    }
}

/// Consumer side of the streamer
#[derive(Clone)]
pub struct StreamerHandle {
    queue: DropOldestQueue<StreamPayload>,
    metrics: Arc<SinkMetrics>,
}

impl StreamerHandle {
    pub fn queue(&self) -> &DropOldestQueue<StreamPayload> {
        &self.queue
    }

    pub fn metrics(&self) -> super::SinkStats {
        self.metrics.snapshot()
    }
}

pub struct StreamerSink {
    decimator: Decimator,
    transport: Option<Box<dyn Transport>>,
    queue: DropOldestQueue<StreamPayload>,
    metrics: Arc<SinkMetrics>,
}

impl StreamerSink {
    pub fn new(
        sensor_fs: f64,
        config: &StreamerConfig,
        transport: Option<Box<dyn Transport>>,
    ) -> TelemetryResult<Self> {
        config.validate()?;
        Ok(Self {
            decimator: Decimator::new(config.decimation(sensor_fs))?,
            transport,
            queue: DropOldestQueue::new(config.queue_capacity)?,
            metrics: Arc::new(SinkMetrics::default()),
        })
    }

    pub fn monitor(&self) -> StreamerHandle {
        StreamerHandle {
            queue: self.queue.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl SampleSink for StreamerSink {
    fn handle(&mut self, timestamps: &[f64], values: &[f64]) -> TelemetryResult<()> {
        SinkMetrics::add(&self.metrics.batches, 1);
        SinkMetrics::add(&self.metrics.samples_in, values.len() as u64);

        let block = self.decimator.process_timed(timestamps, values)?;
        if block.is_empty() {
            return Ok(());
        }
        SinkMetrics::add(&self.metrics.windows_emitted, block.len() as u64);

        let payload = StreamPayload {
            timestamps: block.timestamps,
            mean: block.mean,
        };

        // Transport failures are counted, never propagated
        if let Some(transport) = self.transport.as_mut() {
            match transport.send(&payload) {
                Ok(()) => SinkMetrics::add(&self.metrics.sends, 1),
                Err(e) => {
                    SinkMetrics::add(&self.metrics.send_failures, 1);
                    log::warn!("Stream send via {} failed: {}", transport.name(), e);
                }
            }
        }

        if self.queue.push(payload).is_some() {
            log::debug!("Stream queue full, dropped oldest payload");
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.decimator.reset();
    }

    fn name(&self) -> &'static str {
        "streamer"
    }
}
