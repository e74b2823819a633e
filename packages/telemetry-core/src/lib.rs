//! Real-time sensor telemetry engine
//!
//! Newline-delimited JSON records from a sensor are decoded into per-channel
//! time-series buffers. One tapped channel can be fanned out to a chunked
//! recorder, a decimated low-bandwidth streamer and an envelope plotter.

pub mod config;
pub mod decimator;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod rate;
pub mod reader;
pub mod record;
pub mod ring;
pub mod series;
pub mod session;
pub mod source;
pub mod store;
pub mod transport;
pub mod types;
pub mod writer;

pub use config::TelemetryConfig;
pub use decimator::{
    DecimatedBlock, DecimationConfig, Decimator, WindowMode, MAX_DECIMATION_FACTOR,
};
pub use error::{TelemetryError, TelemetryResult};
pub use pipeline::{Pipeline, PipelineConfig, PipelineStats, PlotUpdate, SampleSink, StreamPayload};
pub use queue::{DropOldestQueue, QueueMetrics};
pub use rate::{RateConfig, RateController, RateEstimate, RateQuality};
pub use reader::{run_reader, spawn_reader_thread, Ingestor, ReaderExit};
pub use record::{decode_line, LineError, Record};
pub use ring::RingBuffer;
pub use series::{Sample, TimeSeriesBuffer};
pub use session::{IngestSession, SessionConfig, SessionEvent, SessionStats, TapConfig};
pub use source::{create_source, LineSource, LineSourceConfig, SourceMetadata};
pub use store::{ChannelBufferStore, ChannelSnapshot};
pub use transport::{ChannelTransport, Transport, UdpTransport};
pub use types::*;
pub use writer::{create_writer, CsvSampleWriter, MemoryWriter, SampleWriter, WriterConfig};
