// Smoothed, enveloped series for live plotting
//
// Consumers either poll the update queue or peek at the cached latest update.

use super::{PlotUpdate, SampleSink, SinkMetrics, SinkStats};
use crate::decimator::{DecimationConfig, Decimator, WindowMode};
use crate::error::{TelemetryError, TelemetryResult};
use crate::queue::DropOldestQueue;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotterConfig {
    pub enabled: bool,
    pub plot_fs: f64,
    pub use_envelope: bool,
    pub window_mode: WindowMode,
    pub stride: Option<usize>,
    pub smoothing_alpha: Option<f64>,
    /// Flag windows where `max - mean` exceeds this; 0 disables the mask
    pub spike_threshold: f64,
    pub queue_capacity: usize,
}

impl Default for PlotterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            plot_fs: 25.0,
            use_envelope: true,
            window_mode: WindowMode::Block,
            stride: None,
            smoothing_alpha: None,
            spike_threshold: 0.0,
            queue_capacity: 64,
        }
    }
}

impl PlotterConfig {
    pub fn decimation(&self, sensor_fs: f64) -> DecimationConfig {
        DecimationConfig {
            sensor_fs,
            plot_fs: self.plot_fs,
            use_envelope: self.use_envelope,
            window_mode: self.window_mode,
            smoothing_alpha: self.smoothing_alpha,
            stride: self.stride,
        }
    }

    pub fn validate(&self) -> TelemetryResult<()> {
        if self.queue_capacity == 0 {
            return Err(TelemetryError::config("plotter queue_capacity must be > 0"));
        }
        if !(self.spike_threshold.is_finite() && self.spike_threshold >= 0.0) {
            return Err(TelemetryError::config(format!(
                "spike_threshold must be >= 0, got {}",
                self.spike_threshold
            )));
        }
        Ok(())
    }
}

/// Consumer side of the plotter
#[derive(Clone)]
pub struct PlotterHandle {
    queue: DropOldestQueue<PlotUpdate>,
    latest: Arc<RwLock<Option<PlotUpdate>>>,
    metrics: Arc<SinkMetrics>,
}

impl PlotterHandle {
    pub fn queue(&self) -> &DropOldestQueue<PlotUpdate> {
        &self.queue
    }

    /// Non-blocking peek at the newest update
    pub fn latest_update(&self) -> Option<PlotUpdate> {
        self.latest.read().clone()
    }

    /// Take up to `max_items` queued updates, oldest first
    pub fn poll(&self, max_items: usize) -> Vec<PlotUpdate> {
        self.queue.drain(max_items)
    }

    pub fn metrics(&self) -> SinkStats {
        self.metrics.snapshot()
    }
}

pub struct PlotterSink {
    decimator: Decimator,
    spike_threshold: f64,
    queue: DropOldestQueue<PlotUpdate>,
    latest: Arc<RwLock<Option<PlotUpdate>>>,
    metrics: Arc<SinkMetrics>,
}

impl PlotterSink {
    pub fn new(sensor_fs: f64, config: &PlotterConfig) -> TelemetryResult<Self> {
        config.validate()?;
        Ok(Self {
            decimator: Decimator::new(config.decimation(sensor_fs))?,
            spike_threshold: config.spike_threshold,
            queue: DropOldestQueue::new(config.queue_capacity)?,
            latest: Arc::new(RwLock::new(None)),
            metrics: Arc::new(SinkMetrics::default()),
        })
    }

    pub fn monitor(&self) -> PlotterHandle {
        PlotterHandle {
            queue: self.queue.clone(),
            latest: Arc::clone(&self.latest),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

fn spike_mask(mean: &[f64], max: Option<&Vec<f64>>, threshold: f64) -> Option<Vec<bool>> {
    if threshold <= 0.0 {
        return None;
    }
    max.map(|max| {
        max.iter()
            .zip(mean)
            .map(|(hi, m)| hi - m > threshold)
            .collect()
    })
}

impl SampleSink for PlotterSink {
    fn handle(&mut self, timestamps: &[f64], values: &[f64]) -> TelemetryResult<()> {
        SinkMetrics::add(&self.metrics.batches, 1);
        SinkMetrics::add(&self.metrics.samples_in, values.len() as u64);

        let block = self.decimator.process_timed(timestamps, values)?;
        if block.is_empty() {
            return Ok(());
        }
        SinkMetrics::add(&self.metrics.windows_emitted, block.len() as u64);

        let update = PlotUpdate {
            spike_mask: spike_mask(&block.mean, block.max.as_ref(), self.spike_threshold),
            timestamps: block.timestamps,
            mean: block.mean,
            min: block.min,
            max: block.max,
        };

        *self.latest.write() = Some(update.clone());
        if self.queue.push(update).is_some() {
            log::debug!("Plot queue full, dropped oldest update");
        }
        SinkMetrics::add(&self.metrics.updates_published, 1);
        Ok(())
    }

    fn reset(&mut self) {
        self.decimator.reset();
    }

    fn name(&self) -> &'static str {
        "plotter"
    }
}
