// Fan-out of raw sample batches to the recorder, streamer and plotter sinks
//
// Every call to `Pipeline::handle_samples` delivers the same batch to all
// three sinks in a fixed order. Disabled sinks are inert placeholders, so the
// pipeline shape never changes at runtime.

pub mod plotter;
pub mod recorder;
pub mod streamer;

pub use plotter::{PlotterConfig, PlotterHandle, PlotterSink};
pub use recorder::{RecorderConfig, RecorderSink};
pub use streamer::{StreamerConfig, StreamerHandle, StreamerSink};

use crate::error::{TelemetryError, TelemetryResult};
use crate::queue::QueueMetrics;
use crate::transport::{Transport, UdpTransport};
use crate::writer::{create_writer, SampleWriter};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Decimated block for the narrow-bandwidth channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamPayload {
    pub timestamps: Vec<f64>,
    pub mean: Vec<f64>,
}

/// Decimated block for live plotting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotUpdate {
    pub timestamps: Vec<f64>,
    pub mean: Vec<f64>,
    pub min: Option<Vec<f64>>,
    pub max: Option<Vec<f64>>,
    pub spike_mask: Option<Vec<bool>>,
}

/// One stage of the fan-out
pub trait SampleSink: Send {
    /// Whether a batch of `len` samples can be taken now
    ///
    /// A refusal means the batch must be offered again later.
    fn admit(&mut self, _len: usize) -> TelemetryResult<()> {
        Ok(())
    }

    /// Consume one raw batch; lengths are already checked by the pipeline
    fn handle(&mut self, timestamps: &[f64], values: &[f64]) -> TelemetryResult<()>;

    /// Push out anything held back waiting for a full chunk
    fn flush(&mut self) -> TelemetryResult<()> {
        Ok(())
    }

    /// Discard partial state after a stream restart
    fn reset(&mut self) {}

    fn name(&self) -> &'static str;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Placeholder for a disabled sink; discards its input
pub struct NullSink {
    name: &'static str,
}

impl NullSink {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl SampleSink for NullSink {
    fn handle(&mut self, _timestamps: &[f64], _values: &[f64]) -> TelemetryResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Counters shared between a sink and whoever monitors it
#[derive(Debug, Default)]
pub struct SinkMetrics {
    pub batches: AtomicU64,
    pub samples_in: AtomicU64,
    pub chunks_written: AtomicU64,
    pub write_failures: AtomicU64,
    pub windows_emitted: AtomicU64,
    pub sends: AtomicU64,
    pub send_failures: AtomicU64,
    pub updates_published: AtomicU64,
}

impl SinkMetrics {
    pub(crate) fn add(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SinkStats {
        SinkStats {
            batches: self.batches.load(Ordering::Relaxed),
            samples_in: self.samples_in.load(Ordering::Relaxed),
            chunks_written: self.chunks_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            windows_emitted: self.windows_emitted.load(Ordering::Relaxed),
            sends: self.sends.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            updates_published: self.updates_published.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SinkStats {
    pub batches: u64,
    pub samples_in: u64,
    pub chunks_written: u64,
    pub write_failures: u64,
    pub windows_emitted: u64,
    pub sends: u64,
    pub send_failures: u64,
    pub updates_published: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub batches: u64,
    pub rejected_batches: u64,
    /// Batches turned away while the recorder backlog was full
    pub backpressured_batches: u64,
    pub recorder: SinkStats,
    pub streamer: SinkStats,
    pub plotter: SinkStats,
    pub stream_queue: Option<QueueMetrics>,
    pub plot_queue: Option<QueueMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Raw input rate shared by all sinks
    pub sensor_fs: f64,
    pub recorder: RecorderConfig,
    pub streamer: StreamerConfig,
    pub plotter: PlotterConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sensor_fs: 100.0,
            recorder: RecorderConfig::default(),
            streamer: StreamerConfig::default(),
            plotter: PlotterConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> TelemetryResult<()> {
        if !(self.sensor_fs.is_finite() && self.sensor_fs > 0.0) {
            return Err(TelemetryError::config(format!(
                "sensor_fs must be > 0, got {}",
                self.sensor_fs
            )));
        }
        if self.recorder.enabled {
            self.recorder.validate()?;
        }
        if self.streamer.enabled {
            self.streamer.decimation(self.sensor_fs).validate()?;
            self.streamer.validate()?;
        }
        if self.plotter.enabled {
            self.plotter.decimation(self.sensor_fs).validate()?;
            self.plotter.validate()?;
        }
        Ok(())
    }
}

pub struct Pipeline {
    recorder: Box<dyn SampleSink>,
    streamer: Box<dyn SampleSink>,
    plotter: Box<dyn SampleSink>,
    recorder_metrics: Arc<SinkMetrics>,
    streamer_handle: Option<StreamerHandle>,
    plotter_handle: Option<PlotterHandle>,
    batches: u64,
    rejected_batches: u64,
    backpressured_batches: u64,
}

impl Pipeline {
    /// Build the three sinks from explicit collaborators
    ///
    /// An enabled recorder requires a writer; the transport is optional.
    pub fn new(
        config: &PipelineConfig,
        writer: Option<Box<dyn SampleWriter>>,
        transport: Option<Box<dyn Transport>>,
    ) -> TelemetryResult<Self> {
        config.validate()?;

        let recorder_metrics = Arc::new(SinkMetrics::default());
        let recorder: Box<dyn SampleSink> = if config.recorder.enabled {
            let writer = writer.ok_or_else(|| {
                TelemetryError::config("recorder is enabled but no writer was supplied")
            })?;
            Box::new(RecorderSink::new(
                config.sensor_fs,
                &config.recorder,
                writer,
                Arc::clone(&recorder_metrics),
            )?)
        } else {
            Box::new(NullSink::new("recorder"))
        };

        let (streamer, streamer_handle): (Box<dyn SampleSink>, _) = if config.streamer.enabled {
            let sink = StreamerSink::new(config.sensor_fs, &config.streamer, transport)?;
            let handle = sink.monitor();
            (Box::new(sink), Some(handle))
        } else {
            (Box::new(NullSink::new("streamer")), None)
        };

        let (plotter, plotter_handle): (Box<dyn SampleSink>, _) = if config.plotter.enabled {
            let sink = PlotterSink::new(config.sensor_fs, &config.plotter)?;
            let handle = sink.monitor();
            (Box::new(sink), Some(handle))
        } else {
            (Box::new(NullSink::new("plotter")), None)
        };

        log::info!(
            "Pipeline ready at {} Hz: recorder={} streamer={} plotter={}",
            config.sensor_fs,
            recorder.is_enabled(),
            streamer.is_enabled(),
            plotter.is_enabled()
        );

        Ok(Self {
            recorder,
            streamer,
            plotter,
            recorder_metrics,
            streamer_handle,
            plotter_handle,
            batches: 0,
            rejected_batches: 0,
            backpressured_batches: 0,
        })
    }

    /// Build collaborators from the recorder output and UDP target settings
    pub fn from_config(config: &PipelineConfig) -> TelemetryResult<Self> {
        let writer = match &config.recorder.output {
            Some(output) if config.recorder.enabled => Some(create_writer(output)?),
            _ => None,
        };
        let transport: Option<Box<dyn Transport>> = match &config.streamer.udp_target {
            Some(target) if config.streamer.enabled => {
                Some(Box::new(UdpTransport::connect(target.as_str())?))
            }
            _ => None,
        };
        Self::new(config, writer, transport)
    }

    /// Fan one raw batch out to every sink
    ///
    /// A length mismatch is rejected before any sink runs, and so is a batch
    /// the recorder has no room for (`RecorderBackpressure`); the caller keeps
    /// that batch and offers it again. Any other sink error does not stop the
    /// remaining sinks; it is returned after they ran.
    pub fn handle_samples(&mut self, timestamps: &[f64], values: &[f64]) -> TelemetryResult<()> {
        if timestamps.len() != values.len() {
            self.rejected_batches += 1;
            return Err(TelemetryError::LengthMismatch {
                timestamps: timestamps.len(),
                values: values.len(),
            });
        }
        if let Err(e) = self.recorder.admit(values.len()) {
            self.backpressured_batches += 1;
            log::debug!("Holding back batch of {}: {}", values.len(), e);
            return Err(e);
        }
        self.batches += 1;

        let mut first_error = None;
        for sink in [&mut self.recorder, &mut self.streamer, &mut self.plotter] {
            if let Err(e) = sink.handle(timestamps, values) {
                log::warn!("{} sink failed on batch of {}: {}", sink.name(), values.len(), e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Flush partial recorder chunks
    pub fn flush(&mut self) -> TelemetryResult<()> {
        let mut first_error = None;
        for sink in [&mut self.recorder, &mut self.streamer, &mut self.plotter] {
            if let Err(e) = sink.flush() {
                log::error!("Failed to flush {} sink: {}", sink.name(), e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drop in-progress decimation windows, e.g. after a stream restart
    pub fn reset(&mut self) {
        self.recorder.reset();
        self.streamer.reset();
        self.plotter.reset();
    }

    pub fn streamer(&self) -> Option<&StreamerHandle> {
        self.streamer_handle.as_ref()
    }

    pub fn plotter(&self) -> Option<&PlotterHandle> {
        self.plotter_handle.as_ref()
    }

    /// Most recent plot update without consuming the queue
    pub fn latest_update(&self) -> Option<PlotUpdate> {
        self.plotter_handle
            .as_ref()
            .and_then(|handle| handle.latest_update())
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            batches: self.batches,
            rejected_batches: self.rejected_batches,
            backpressured_batches: self.backpressured_batches,
            recorder: self.recorder_metrics.snapshot(),
            streamer: self
                .streamer_handle
                .as_ref()
                .map(|h| h.metrics())
                .unwrap_or_default(),
            plotter: self
                .plotter_handle
                .as_ref()
                .map(|h| h.metrics())
                .unwrap_or_default(),
            stream_queue: self.streamer_handle.as_ref().map(|h| h.queue().metrics()),
            plot_queue: self.plotter_handle.as_ref().map(|h| h.queue().metrics()),
        }
    }
}
