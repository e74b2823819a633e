use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufReader, Write};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use telemetry_core::pipeline::RecorderConfig;
use telemetry_core::{
    spawn_reader_thread, ChannelBufferStore, ChannelKey, IngestCounters, Ingestor, Pipeline,
    PipelineConfig, RateConfig, RateController, RateQuality, ReaderExit, SourceId,
    TelemetryConfig, WriterConfig,
};
use tempfile::TempDir;

/// Write a capture of `n` IMU records at 100 Hz with a status line and noise
fn write_capture(dir: &TempDir, n: usize) -> std::path::PathBuf {
    let path = dir.path().join("capture.ndjson");
    let mut file = File::create(&path).unwrap();
    writeln!(file, r#"{{"type":"status","sensor_id":1,"hz":100.0}}"#).unwrap();
    for i in 0..n {
        let ns = i as u64 * 10_000_000;
        writeln!(
            file,
            r#"{{"sensor_id":1,"timestamp_ns":{},"ax":{},"ay":"{}","ok":true}}"#,
            ns,
            i % 7,
            -(i as f64) / 2.0
        )
        .unwrap();
        if i % 50 == 0 {
            writeln!(file, "garbage").unwrap();
        }
    }
    writeln!(file, r#"{{"sensor_id":2,"ax":1.0}}"#).unwrap();
    path
}

#[test]
fn test_reader_thread_records_tapped_channel() {
    let dir = TempDir::new().unwrap();
    let capture = write_capture(&dir, 250);
    let csv_path = dir.path().join("ax.csv");

    let pipeline = Pipeline::from_config(&PipelineConfig {
        recorder: RecorderConfig {
            enabled: true,
            chunk_seconds: 1.0,
            output: Some(WriterConfig::Csv {
                path: csv_path.clone(),
            }),
            ..RecorderConfig::default()
        },
        ..PipelineConfig::default()
    })
    .unwrap();

    let store = Arc::new(ChannelBufferStore::new(1000).unwrap());
    let rate = Arc::new(Mutex::new(RateController::new(RateConfig::default()).unwrap()));
    let ingestor = Ingestor::new(
        Arc::clone(&store),
        Arc::clone(&rate),
        Arc::new(IngestCounters::default()),
    )
    .with_tap(
        ChannelKey::new(1, "ax"),
        16,
        Arc::new(Mutex::new(pipeline)),
    )
    .unwrap();

    let reader = BufReader::new(File::open(&capture).unwrap());
    let stop = Arc::new(AtomicBool::new(false));
    let exit = spawn_reader_thread(reader, ingestor, stop)
        .unwrap()
        .join()
        .unwrap()
        .unwrap();
    assert_eq!(exit, ReaderExit::Exhausted);

    // Numeric strings are channels, booleans are not
    let keys = store.keys();
    assert_eq!(keys, vec![ChannelKey::new(1, "ax"), ChannelKey::new(1, "ay")]);
    let (ts, ay) = store.read_window(&ChannelKey::new(1, "ay"), 0.1);
    assert_eq!(ts.len(), ay.len());
    assert_eq!(ay.last(), Some(&-124.5));
    assert!((store.latest_timestamp(Some(&SourceId::Int(1))).unwrap() - 2.49).abs() < 1e-9);

    let estimate = rate.lock().estimate();
    assert_eq!(estimate.quality, RateQuality::Fused);
    assert!((estimate.hz_effective - 100.0).abs() < 0.5);

    // All 250 samples reach the file: 2 full chunks plus the flushed tail
    let mut csv = csv::Reader::from_path(&csv_path).unwrap();
    let rows: Vec<(f64, f64)> = csv.deserialize().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 250);
    assert_eq!(rows[8], (0.08, 1.0));
    assert!(rows.windows(2).all(|w| w[0].0 < w[1].0));
}

#[tokio::test]
async fn test_session_from_file_config() {
    let dir = TempDir::new().unwrap();
    let capture = write_capture(&dir, 120);
    let config_path = dir.path().join("telemetry.json");
    std::fs::write(
        &config_path,
        serde_json::json!({
            "session": { "tap": { "source_id": 1, "channel": "ax", "batch_size": 10 } },
            "pipeline": { "plotter": { "enabled": true, "plot_fs": 10.0 } },
            "source": { "type": "file", "path": capture }
        })
        .to_string(),
    )
    .unwrap();

    let config = TelemetryConfig::from_file(&config_path).unwrap();
    let mut session = config.build_session().unwrap();
    let source = telemetry_core::create_source(config.source.clone()).unwrap();
    session.start(source).await.unwrap();
    session.wait().await;

    let stats = session.stats();
    assert_eq!(stats.ingest.records_dispatched, 120);
    assert_eq!(stats.ingest.malformed_lines, 3 + 1);
    assert_eq!(stats.ingest.records_without_timestamp, 1);
    assert_eq!(stats.ingest.status_reports, 1);
    assert_eq!(stats.ingest.dropped_fields, 0);

    // 120 samples at 100 Hz decimated by 10
    let plotter = stats.pipeline.unwrap().plotter;
    assert_eq!(plotter.samples_in, 120);
    assert_eq!(plotter.windows_emitted, 12);
}
