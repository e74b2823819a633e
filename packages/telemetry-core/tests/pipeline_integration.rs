use crossbeam::channel;
use telemetry_core::pipeline::{PlotterConfig, RecorderConfig, StreamerConfig};
use telemetry_core::{
    ChannelTransport, MemoryWriter, Pipeline, PipelineConfig, StreamPayload, TelemetryError,
};

fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len(), "{:?} vs {:?}", actual, expected);
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-9, "{:?} vs {:?}", actual, expected);
    }
}

fn full_config() -> PipelineConfig {
    PipelineConfig {
        sensor_fs: 100.0,
        recorder: RecorderConfig {
            enabled: true,
            chunk_seconds: 0.04,
            ..RecorderConfig::default()
        },
        streamer: StreamerConfig {
            enabled: true,
            stream_fs: 25.0,
            ..StreamerConfig::default()
        },
        plotter: PlotterConfig {
            enabled: true,
            plot_fs: 25.0,
            use_envelope: true,
            ..PlotterConfig::default()
        },
    }
}

fn twelve_samples() -> (Vec<f64>, Vec<f64>) {
    let timestamps = (0..12).map(|i| i as f64 * 0.01).collect();
    let values = (1..=12).map(f64::from).collect();
    (timestamps, values)
}

/// Twelve samples at 100 Hz decimated to 25 Hz, delivered in one batch
#[test]
fn test_twelve_sample_fan_out() {
    let writer = MemoryWriter::new();
    let (tx, rx) = channel::bounded::<StreamPayload>(16);
    let mut pipeline = Pipeline::new(
        &full_config(),
        Some(Box::new(writer.clone())),
        Some(Box::new(ChannelTransport::new(tx))),
    )
    .unwrap();

    let (timestamps, values) = twelve_samples();
    pipeline.handle_samples(&timestamps, &values).unwrap();

    // Recorder: three full chunks of four, nothing decimated
    assert_eq!(writer.chunk_count(), 3);
    let recorded: Vec<f64> = writer.samples().iter().map(|s| s.value).collect();
    assert_eq!(recorded, values);

    // Streamer: one payload for the batch, mean only
    let payload = rx.try_recv().unwrap();
    assert_close(&payload.mean, &[2.5, 6.5, 10.5]);
    assert_close(&payload.timestamps, &[0.02, 0.06, 0.10]);
    assert!(rx.try_recv().is_err());

    // Plotter: envelope around each mean
    let update = pipeline.latest_update().unwrap();
    assert_close(&update.timestamps, &[0.02, 0.06, 0.10]);
    assert_close(&update.mean, &[2.5, 6.5, 10.5]);
    assert_close(update.min.as_deref().unwrap(), &[1.0, 5.0, 9.0]);
    assert_close(update.max.as_deref().unwrap(), &[4.0, 8.0, 12.0]);
    assert_eq!(update.spike_mask, None);

    let stats = pipeline.stats();
    assert_eq!(stats.batches, 1);
    assert_eq!(stats.recorder.chunks_written, 3);
    assert_eq!(stats.streamer.sends, 1);
    assert_eq!(stats.plotter.updates_published, 1);
}

/// The same samples split unevenly across batches produce the same windows
#[test]
fn test_batch_boundaries_do_not_change_output() {
    let writer = MemoryWriter::new();
    let mut pipeline = Pipeline::new(&full_config(), Some(Box::new(writer.clone())), None).unwrap();

    let (timestamps, values) = twelve_samples();
    for (ts, vs) in [(0, 3), (3, 5), (5, 12)].map(|(a, b)| (&timestamps[a..b], &values[a..b])) {
        pipeline.handle_samples(ts, vs).unwrap();
    }

    let plotter = pipeline.plotter().unwrap();
    let means: Vec<f64> = plotter
        .poll(16)
        .into_iter()
        .flat_map(|update| update.mean)
        .collect();
    assert_close(&means, &[2.5, 6.5, 10.5]);

    let streamed: Vec<f64> = pipeline
        .streamer()
        .unwrap()
        .queue()
        .drain(16)
        .into_iter()
        .flat_map(|payload| payload.mean)
        .collect();
    assert_close(&streamed, &[2.5, 6.5, 10.5]);
    assert_eq!(writer.samples().len(), 12);
}

/// A partial chunk reaches the writer only on flush
#[test]
fn test_flush_writes_partial_chunk() {
    let writer = MemoryWriter::new();
    let mut pipeline = Pipeline::new(&full_config(), Some(Box::new(writer.clone())), None).unwrap();

    pipeline
        .handle_samples(&[0.0, 0.01, 0.02, 0.03, 0.04, 0.05], &[1.0; 6])
        .unwrap();
    assert_eq!(writer.samples().len(), 4);

    pipeline.flush().unwrap();
    assert_eq!(writer.samples().len(), 6);
    assert_eq!(writer.chunk_count(), 2);
}

#[test]
fn test_mismatched_batch_reaches_no_sink() {
    let writer = MemoryWriter::new();
    let mut pipeline = Pipeline::new(&full_config(), Some(Box::new(writer.clone())), None).unwrap();

    let err = pipeline
        .handle_samples(&[0.0, 0.01, 0.02, 0.03], &[1.0, 2.0, 3.0])
        .unwrap_err();
    assert!(matches!(
        err,
        TelemetryError::LengthMismatch {
            timestamps: 4,
            values: 3
        }
    ));
    assert!(writer.samples().is_empty());
    assert!(pipeline.latest_update().is_none());
    assert_eq!(pipeline.stats().rejected_batches, 1);
}

/// A consumer that stops reading does not stall the streamer
#[test]
fn test_slow_stream_consumer_is_counted_not_fatal() {
    let (tx, rx) = channel::bounded::<StreamPayload>(1);
    let mut config = full_config();
    config.recorder.enabled = false;
    let mut pipeline =
        Pipeline::new(&config, None, Some(Box::new(ChannelTransport::new(tx)))).unwrap();

    let (timestamps, values) = twelve_samples();
    for chunk in 0..3 {
        let range = chunk * 4..chunk * 4 + 4;
        pipeline
            .handle_samples(&timestamps[range.clone()], &values[range])
            .unwrap();
    }

    let stats = pipeline.stats();
    assert_eq!(stats.streamer.sends, 1);
    assert_eq!(stats.streamer.send_failures, 2);
    assert_eq!(rx.len(), 1);
    // The queue still holds every payload
    assert_eq!(stats.stream_queue.unwrap().current_size, 3);
}
