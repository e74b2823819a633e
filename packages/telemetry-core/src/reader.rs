// Stream reader loop
//
// Turns decoded lines into channel-store appends, rate observations and,
// for one tapped channel, pipeline batches. Bad lines and bad fields are
// logged and counted; they never end the loop. A tapped batch the recorder
// cannot take yet is held and offered again; the loop only ends early once
// the held samples pass their bound.

use crate::error::{TelemetryError, TelemetryResult};
use crate::pipeline::Pipeline;
use crate::rate::{RateConfig, RateController, RateEstimate};
use crate::record::{decode_line, LineError, Record, SampleRecord, StatusReport};
use crate::store::ChannelBufferStore;
use crate::types::{ChannelKey, IngestCounters, IngestStats, SourceId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// How the reader loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderExit {
    /// Input closed
    Exhausted,
    /// Stop flag observed between lines
    Stopped,
}

/// Batches a tap may hold back under recorder backpressure
const MAX_RETAINED_BATCHES: usize = 64;

/// Routes the samples of one channel into a pipeline in fixed-size batches
struct Tap {
    key: ChannelKey,
    batch_size: usize,
    timestamps: Vec<f64>,
    values: Vec<f64>,
    pipeline: Arc<Mutex<Pipeline>>,
}

impl Tap {
    fn push(&mut self, timestamp: f64, value: f64) -> TelemetryResult<()> {
        self.timestamps.push(timestamp);
        self.values.push(value);
        if self.values.len() >= self.batch_size {
            return self.send();
        }
        Ok(())
    }

    // A refused batch stays here and grows until the recorder takes it
    fn send(&mut self) -> TelemetryResult<()> {
        if self.values.is_empty() {
            return Ok(());
        }
        let result = self
            .pipeline
            .lock()
            .handle_samples(&self.timestamps, &self.values);
        match result {
            Err(TelemetryError::RecorderBackpressure { pending }) => {
                let retained = self.values.len();
                if retained >= self.batch_size * MAX_RETAINED_BATCHES {
                    return Err(TelemetryError::PipelineStalled { retained });
                }
                log::debug!(
                    "Holding {} samples of {} while {} chunks await write",
                    retained,
                    self.key,
                    pending
                );
                Ok(())
            }
            result => {
                self.timestamps.clear();
                self.values.clear();
                result
            }
        }
    }

    fn retained(&self) -> usize {
        self.values.len()
    }
}

/// Per-stream ingestion state shared by the sync and async reader loops
pub struct Ingestor {
    store: Arc<ChannelBufferStore>,
    rate: Arc<Mutex<RateController>>,
    counters: Arc<IngestCounters>,
    rate_source: Option<SourceId>,
    tap: Option<Tap>,
}

impl Ingestor {
    pub fn new(
        store: Arc<ChannelBufferStore>,
        rate: Arc<Mutex<RateController>>,
        counters: Arc<IngestCounters>,
    ) -> Self {
        Self {
            store,
            rate,
            counters,
            rate_source: None,
            tap: None,
        }
    }

    /// Ingestor with its own store, rate controller and counters
    pub fn standalone(buffer_capacity: usize, rate: RateConfig) -> TelemetryResult<Self> {
        Ok(Self::new(
            Arc::new(ChannelBufferStore::new(buffer_capacity)?),
            Arc::new(Mutex::new(RateController::new(rate)?)),
            Arc::new(IngestCounters::default()),
        ))
    }

    /// Only timestamps and status reports from `source` feed the rate estimate
    pub fn with_rate_source(mut self, source: Option<SourceId>) -> Self {
        self.rate_source = source;
        self
    }

    /// Forward samples of `key` to `pipeline` in batches of `batch_size`
    pub fn with_tap(
        mut self,
        key: ChannelKey,
        batch_size: usize,
        pipeline: Arc<Mutex<Pipeline>>,
    ) -> TelemetryResult<Self> {
        if batch_size == 0 {
            return Err(TelemetryError::config("tap batch size must be > 0"));
        }
        log::info!("Tapping channel {} into the pipeline", key);
        self.tap = Some(Tap {
            key,
            batch_size,
            timestamps: Vec::with_capacity(batch_size),
            values: Vec::with_capacity(batch_size),
            pipeline,
        });
        Ok(self)
    }

    pub fn store(&self) -> &Arc<ChannelBufferStore> {
        &self.store
    }

    pub fn stats(&self) -> IngestStats {
        self.counters.snapshot()
    }

    pub fn effective_rate(&self) -> RateEstimate {
        self.rate.lock().estimate()
    }

    /// Handle one raw line
    ///
    /// Only a pipeline failure on the tapped channel is returned; it is also
    /// counted, and the samples are already in the store.
    pub fn ingest_line(&mut self, line: &str) -> TelemetryResult<()> {
        IngestCounters::bump(&self.counters.lines_read, 1);
        match decode_line(line) {
            Ok(None) => Ok(()),
            Ok(Some(Record::Samples(record))) => self.dispatch(record),
            Ok(Some(Record::Status(status))) => {
                self.apply_status(status);
                Ok(())
            }
            Err(e) => {
                IngestCounters::bump(&self.counters.malformed_lines, 1);
                if e == LineError::MissingTimestamp {
                    IngestCounters::bump(&self.counters.records_without_timestamp, 1);
                }
                log::warn!("Skipping line: {} ({})", e, preview(line));
                Ok(())
            }
        }
    }

    fn dispatch(&mut self, record: SampleRecord) -> TelemetryResult<()> {
        if record.dropped_fields > 0 {
            IngestCounters::bump(&self.counters.dropped_fields, record.dropped_fields as u64);
            log::debug!(
                "Dropped {} non-numeric fields from record at t={}",
                record.dropped_fields,
                record.timestamp
            );
        }
        IngestCounters::bump(&self.counters.records_dispatched, 1);

        if self.tracks_rate(&record.source_id) {
            self.rate.lock().observe(record.timestamp);
        }

        let mut tap_result = Ok(());
        for (channel, value) in record.channels {
            let key = ChannelKey::new(record.source_id.clone(), channel);
            self.store.append(&key, record.timestamp, value);
            IngestCounters::bump(&self.counters.samples_appended, 1);

            if let Some(tap) = self.tap.as_mut().filter(|tap| tap.key == key) {
                if let Err(e) = tap.push(record.timestamp, value) {
                    IngestCounters::bump(&self.counters.pipeline_errors, 1);
                    tap_result = Err(e);
                }
            }
        }
        tap_result
    }

    fn apply_status(&mut self, status: StatusReport) {
        IngestCounters::bump(&self.counters.status_reports, 1);
        if self.tracks_rate(&status.source_id) {
            self.rate.lock().update_from_status(status.interval, status.hz);
        }
    }

    fn tracks_rate(&self, source_id: &SourceId) -> bool {
        self.rate_source
            .as_ref()
            .map_or(true, |wanted| wanted == source_id)
    }

    /// Send the partial tap batch and flush the pipeline
    ///
    /// Samples the recorder still refuses after the flush are reported as
    /// `PipelineStalled`.
    pub fn finish(&mut self) -> TelemetryResult<()> {
        if let Some(tap) = self.tap.as_mut() {
            let sent = tap.send();
            let mut flushed = tap.pipeline.lock().flush();
            // A flush that emptied the backlog makes room for held samples
            if flushed.is_ok() && tap.retained() > 0 {
                flushed = tap.send().and_then(|()| tap.pipeline.lock().flush());
            }
            if tap.retained() > 0 {
                return Err(TelemetryError::PipelineStalled {
                    retained: tap.retained(),
                });
            }
            sent.and(flushed)?;
        }
        Ok(())
    }
}

fn preview(line: &str) -> &str {
    let line = line.trim();
    match line.char_indices().nth(80) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

/// Read lines until the input closes or `stop` is set
///
/// The stop flag is checked between lines. Non-UTF-8 lines count as
/// malformed. Pipeline errors are logged and the loop continues, except
/// `PipelineStalled`, which ends the loop and is returned.
pub fn run_reader<R: BufRead>(
    mut reader: R,
    ingestor: &mut Ingestor,
    stop: &AtomicBool,
) -> TelemetryResult<ReaderExit> {
    let mut buf = Vec::new();
    let mut stalled = None;
    let exit = loop {
        if stop.load(Ordering::Relaxed) {
            break ReaderExit::Stopped;
        }

        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break ReaderExit::Exhausted;
        }

        match std::str::from_utf8(&buf) {
            Ok(line) => match ingestor.ingest_line(line) {
                Ok(()) => {}
                Err(e @ TelemetryError::PipelineStalled { .. }) => {
                    log::error!("Stopping reader: {}", e);
                    stalled = Some(e);
                    break ReaderExit::Stopped;
                }
                Err(e) => log::error!("Pipeline rejected tapped samples: {}", e),
            },
            Err(e) => {
                IngestCounters::bump(&ingestor.counters.lines_read, 1);
                IngestCounters::bump(&ingestor.counters.malformed_lines, 1);
                log::warn!("Skipping non-UTF-8 line: {}", e);
            }
        }
    };

    if let Err(e) = ingestor.finish() {
        log::error!("Failed to flush pipeline at end of stream: {}", e);
    }

    let stats = ingestor.stats();
    log::info!(
        "Reader loop ended ({:?}): {} lines, {} samples, {} malformed",
        exit,
        stats.lines_read,
        stats.samples_appended,
        stats.malformed_lines
    );
    match stalled {
        Some(e) => Err(e),
        None => Ok(exit),
    }
}

/// Run the reader loop on a dedicated thread
pub fn spawn_reader_thread<R>(
    reader: R,
    mut ingestor: Ingestor,
    stop: Arc<AtomicBool>,
) -> TelemetryResult<JoinHandle<TelemetryResult<ReaderExit>>>
where
    R: BufRead + Send + 'static,
{
    let handle = thread::Builder::new()
        .name("telemetry-reader".to_string())
        .spawn(move || run_reader(reader, &mut ingestor, &stop))?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineConfig;
    use crate::rate::{RateConfig, RateQuality};
    use crate::writer::{MemoryWriter, SampleWriter};
    use std::io::Cursor;

    fn ingestor() -> Ingestor {
        Ingestor::new(
            Arc::new(ChannelBufferStore::new(128).unwrap()),
            Arc::new(Mutex::new(RateController::new(RateConfig::default()).unwrap())),
            Arc::new(IngestCounters::default()),
        )
    }

    #[test]
    fn test_dispatches_numeric_fields_only() {
        let mut ingestor = ingestor();
        ingestor
            .ingest_line(r#"{"sensor_id":1,"t_s":1.0,"ax":0.5,"note":"ok"}"#)
            .unwrap();

        let store = ingestor.store();
        assert_eq!(store.keys(), vec![ChannelKey::new(1, "ax")]);
        let sample = store.latest(&ChannelKey::new(1, "ax")).unwrap();
        assert_eq!((sample.timestamp, sample.value), (1.0, 0.5));

        let stats = ingestor.stats();
        assert_eq!(stats.samples_appended, 1);
        assert_eq!(stats.dropped_fields, 1);
    }

    #[test]
    fn test_loop_survives_malformed_input() {
        let input = concat!(
            "{\"t_s\":0.0,\"ax\":1}\n",
            "garbage\n",
            "\n",
            "[1,2,3]\n",
            "{\"ax\":2}\n",
            "{\"t_s\":0.1,\"ax\":3}\n",
        );
        let mut ingestor = ingestor();
        let stop = AtomicBool::new(false);
        let exit = run_reader(Cursor::new(input), &mut ingestor, &stop).unwrap();
        assert_eq!(exit, ReaderExit::Exhausted);

        let stats = ingestor.stats();
        assert_eq!(stats.lines_read, 6);
        assert_eq!(stats.malformed_lines, 3);
        assert_eq!(stats.records_without_timestamp, 1);
        assert_eq!(stats.samples_appended, 2);

        let key = ChannelKey::new(SourceId::unspecified(), "ax");
        let (_, values) = ingestor.store().read_window(&key, 10.0);
        assert_eq!(values, vec![1.0, 3.0]);
    }

    #[test]
    fn test_stop_flag_checked_between_lines() {
        let mut ingestor = ingestor();
        let stop = AtomicBool::new(true);
        let exit = run_reader(Cursor::new("{\"t_s\":0,\"a\":1}\n"), &mut ingestor, &stop).unwrap();
        assert_eq!(exit, ReaderExit::Stopped);
        assert_eq!(ingestor.stats().lines_read, 0);
    }

    #[test]
    fn test_non_utf8_line_counted() {
        let mut input = b"{\"t_s\":0,\"a\":1}\n".to_vec();
        input.extend_from_slice(&[0xff, 0xfe, b'\n']);
        input.extend_from_slice(b"{\"t_s\":1,\"a\":2}\n");

        let mut ingestor = ingestor();
        run_reader(Cursor::new(input), &mut ingestor, &AtomicBool::new(false)).unwrap();
        let stats = ingestor.stats();
        assert_eq!(stats.malformed_lines, 1);
        assert_eq!(stats.samples_appended, 2);
    }

    #[test]
    fn test_status_and_timestamps_feed_rate() {
        let mut ingestor = ingestor();
        let rate = Arc::clone(&ingestor.rate);
        ingestor
            .ingest_line(r#"{"type":"status","interval":0.02}"#)
            .unwrap();
        assert_eq!(rate.lock().estimate().quality, RateQuality::StatusOnly);

        for i in 0..50 {
            ingestor
                .ingest_line(&format!(r#"{{"t_s":{},"ax":0}}"#, i as f64 * 0.02))
                .unwrap();
        }
        let estimate = rate.lock().estimate();
        assert_eq!(estimate.quality, RateQuality::Fused);
        assert!((estimate.hz_effective - 50.0).abs() < 0.5);
        assert!(ingestor.store().keys().len() == 1);
    }

    #[test]
    fn test_rate_source_filter() {
        let mut ingestor = ingestor().with_rate_source(Some(SourceId::Int(2)));
        let rate = Arc::clone(&ingestor.rate);
        ingestor
            .ingest_line(r#"{"type":"status","sensor_id":1,"hz":10}"#)
            .unwrap();
        assert_eq!(rate.lock().estimate().quality, RateQuality::Default);
    }

    #[test]
    fn test_tap_batches_and_flushes_on_finish() {
        let mut config = PipelineConfig::default();
        config.plotter.enabled = true;
        config.plotter.plot_fs = 25.0;
        let pipeline = Arc::new(Mutex::new(Pipeline::new(&config, None, None).unwrap()));

        let mut ingestor = ingestor()
            .with_tap(ChannelKey::new(1, "ax"), 8, Arc::clone(&pipeline))
            .unwrap();

        let mut input = String::new();
        for i in 0..12 {
            input.push_str(&format!(
                "{{\"sensor_id\":1,\"t_s\":{},\"ax\":{},\"ay\":0}}\n",
                i as f64 * 0.01,
                i + 1
            ));
        }
        run_reader(Cursor::new(input), &mut ingestor, &AtomicBool::new(false)).unwrap();

        let stats = pipeline.lock().stats();
        // One full batch of 8, then the remaining 4 on finish
        assert_eq!(stats.batches, 2);
        let updates = pipeline.lock().plotter().unwrap().poll(10);
        let means: Vec<f64> = updates.iter().flat_map(|u| u.mean.clone()).collect();
        assert_eq!(means, vec![2.5, 6.5, 10.5]);
    }

    /// Fails while the shared flag is set
    struct FlakyWriter {
        inner: MemoryWriter,
        failing: Arc<AtomicBool>,
    }

    impl SampleWriter for FlakyWriter {
        fn write_samples(&mut self, t: &[f64], v: &[f64]) -> TelemetryResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(TelemetryError::Writer("disk full".into()));
            }
            self.inner.write_samples(t, v)
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    /// Pipeline recording one-sample chunks through a writer that starts failing
    fn recording_pipeline(max_pending: usize) -> (Arc<Mutex<Pipeline>>, MemoryWriter, Arc<AtomicBool>) {
        let mut config = PipelineConfig::default();
        config.recorder.enabled = true;
        config.recorder.chunk_seconds = 0.01;
        config.recorder.max_pending_chunks = max_pending;

        let memory = MemoryWriter::new();
        let failing = Arc::new(AtomicBool::new(true));
        let writer = FlakyWriter {
            inner: memory.clone(),
            failing: Arc::clone(&failing),
        };
        let pipeline = Pipeline::new(&config, Some(Box::new(writer)), None).unwrap();
        (Arc::new(Mutex::new(pipeline)), memory, failing)
    }

    fn ax_line(i: usize) -> String {
        format!("{{\"sensor_id\":1,\"t_s\":{},\"ax\":{}}}", i as f64 * 0.01, i)
    }

    #[test]
    fn test_tap_holds_refused_batch_until_recorder_recovers() {
        let (pipeline, memory, failing) = recording_pipeline(2);
        let mut ingestor = ingestor()
            .with_tap(ChannelKey::new(1, "ax"), 2, Arc::clone(&pipeline))
            .unwrap();

        // First batch fills the backlog, the second is refused and held
        for i in 0..4 {
            ingestor.ingest_line(&ax_line(i)).unwrap();
        }
        assert_eq!(pipeline.lock().stats().backpressured_batches, 1);
        assert!(memory.samples().is_empty());

        failing.store(false, Ordering::SeqCst);
        for i in 4..6 {
            ingestor.ingest_line(&ax_line(i)).unwrap();
        }
        ingestor.finish().unwrap();

        let values: Vec<f64> = memory.samples().iter().map(|s| s.value).collect();
        assert_eq!(values, (0..6).map(|i| i as f64).collect::<Vec<_>>());
        assert_eq!(pipeline.lock().stats().recorder.samples_in, 6);
        assert_eq!(ingestor.stats().pipeline_errors, 0);
    }

    #[test]
    fn test_reader_stops_when_tap_stalls() {
        let (pipeline, memory, _failing) = recording_pipeline(1);
        let mut ingestor = ingestor()
            .with_tap(ChannelKey::new(1, "ax"), 1, Arc::clone(&pipeline))
            .unwrap();

        let input: String = (0..200).map(|i| ax_line(i) + "\n").collect();
        let result = run_reader(Cursor::new(input), &mut ingestor, &AtomicBool::new(false));
        assert!(matches!(
            result,
            Err(TelemetryError::PipelineStalled { retained: 64 })
        ));

        // One accepted sample, then 64 held before the loop gave up
        assert_eq!(ingestor.stats().lines_read, 65);
        let (_, values) = ingestor.store().read_window(&ChannelKey::new(1, "ax"), 10.0);
        assert_eq!(values.len(), 65);
        assert!(memory.samples().is_empty());
    }

    #[test]
    fn test_finish_reports_samples_still_held() {
        let (pipeline, _memory, _failing) = recording_pipeline(1);
        let mut ingestor = ingestor()
            .with_tap(ChannelKey::new(1, "ax"), 1, Arc::clone(&pipeline))
            .unwrap();

        for i in 0..3 {
            ingestor.ingest_line(&ax_line(i)).unwrap();
        }
        assert!(matches!(
            ingestor.finish(),
            Err(TelemetryError::PipelineStalled { retained: 2 })
        ));
    }

    #[test]
    fn test_spawned_reader_thread() {
        let ingestor = ingestor();
        let store = Arc::clone(ingestor.store());
        let handle = spawn_reader_thread(
            Cursor::new("{\"sensor_id\":\"a\",\"t_s\":5,\"x\":1}\n"),
            ingestor,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        assert_eq!(handle.join().unwrap().unwrap(), ReaderExit::Exhausted);
        assert_eq!(store.latest_timestamp(Some(&SourceId::from("a"))), Some(5.0));
    }
}
