// Persistence targets for the recorder sink
//
// The recorder hands every full chunk to a `SampleWriter`. Slices are only
// borrowed for the duration of the call.

use crate::error::{TelemetryError, TelemetryResult};
use crate::series::Sample;
use parking_lot::Mutex;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Destination for lossless sample persistence
pub trait SampleWriter: Send {
    /// Persist one chunk; called again with the same chunk after a failure
    fn write_samples(&mut self, timestamps: &[f64], values: &[f64]) -> TelemetryResult<()>;

    fn flush(&mut self) -> TelemetryResult<()> {
        Ok(())
    }

    /// Short name for logs
    fn name(&self) -> &str;
}

/// Two-column `timestamp,value` CSV output
///
/// Each chunk is formatted in memory and handed to the sink with a single
/// `write_all`, so a failed write leaves nothing behind to duplicate on retry.
pub struct CsvSampleWriter<W: Write> {
    inner: W,
    rows_written: u64,
    label: String,
}

impl CsvSampleWriter<File> {
    /// Create (or truncate) a CSV file and write the header
    pub fn create(path: impl AsRef<Path>) -> TelemetryResult<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        log::info!("Recording samples to {}", path.display());
        Self::from_writer(file, path.display().to_string())
    }
}

impl<W: Write> CsvSampleWriter<W> {
    pub fn from_writer(mut inner: W, label: impl Into<String>) -> TelemetryResult<Self> {
        let header = encode(|csv| csv.write_record(["timestamp", "value"]))?;
        inner.write_all(&header)?;
        Ok(Self {
            inner,
            rows_written: 0,
            label: label.into(),
        })
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Flush and hand back the underlying writer
    pub fn into_inner(mut self) -> TelemetryResult<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

fn encode(
    fill: impl FnOnce(&mut csv::Writer<Vec<u8>>) -> csv::Result<()>,
) -> TelemetryResult<Vec<u8>> {
    let mut csv = csv::Writer::from_writer(Vec::new());
    fill(&mut csv)?;
    csv.into_inner()
        .map_err(|e| TelemetryError::Writer(e.error().to_string()))
}

impl<W: Write + Send> SampleWriter for CsvSampleWriter<W> {
    fn write_samples(&mut self, timestamps: &[f64], values: &[f64]) -> TelemetryResult<()> {
        if timestamps.len() != values.len() {
            return Err(TelemetryError::LengthMismatch {
                timestamps: timestamps.len(),
                values: values.len(),
            });
        }
        let rows = encode(|csv| {
            for (ts, value) in timestamps.iter().zip(values) {
                csv.write_record([ts.to_string(), value.to_string()])?;
            }
            Ok(())
        })?;
        self.inner.write_all(&rows)?;
        self.rows_written += timestamps.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> TelemetryResult<()> {
        self.inner.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// In-process writer; clones share the collected samples
#[derive(Clone, Default)]
pub struct MemoryWriter {
    samples: Arc<Mutex<Vec<Sample>>>,
    chunks: Arc<Mutex<usize>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.samples.lock().clone()
    }

    pub fn chunk_count(&self) -> usize {
        *self.chunks.lock()
    }
}

impl SampleWriter for MemoryWriter {
    fn write_samples(&mut self, timestamps: &[f64], values: &[f64]) -> TelemetryResult<()> {
        if timestamps.len() != values.len() {
            return Err(TelemetryError::LengthMismatch {
                timestamps: timestamps.len(),
                values: values.len(),
            });
        }
        self.samples.lock().extend(
            timestamps
                .iter()
                .zip(values)
                .map(|(&timestamp, &value)| Sample { timestamp, value }),
        );
        *self.chunks.lock() += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Where the recorder should write
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WriterConfig {
    Csv { path: PathBuf },
    Memory,
}

/// Build a writer from configuration
pub fn create_writer(config: &WriterConfig) -> TelemetryResult<Box<dyn SampleWriter>> {
    match config {
        WriterConfig::Csv { path } => Ok(Box::new(CsvSampleWriter::create(path)?)),
        WriterConfig::Memory => Ok(Box::new(MemoryWriter::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_csv_writer_appends_rows() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("samples.csv");

        let mut writer = CsvSampleWriter::create(&path).unwrap();
        writer.write_samples(&[0.0, 0.01], &[1.5, -2.0]).unwrap();
        writer.write_samples(&[0.02], &[3.0]).unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.rows_written(), 3);
        drop(writer);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "timestamp,value");
        assert_eq!(lines[1], "0,1.5");
        assert_eq!(lines[3], "0.02,3");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_csv_writer_rejects_mismatch() {
        let mut writer = CsvSampleWriter::from_writer(Vec::new(), "buf").unwrap();
        assert!(writer.write_samples(&[0.0], &[]).is_err());
        assert_eq!(writer.rows_written(), 0);
    }

    /// In-memory sink whose `fail_on`-th write call errors
    struct FailingOnce {
        data: Vec<u8>,
        calls: usize,
        fail_on: usize,
    }

    impl Write for FailingOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let call = self.calls;
            self.calls += 1;
            if call == self.fail_on {
                return Err(std::io::Error::other("disk full"));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_csv_writer_retry_does_not_duplicate_rows() {
        let sink = FailingOnce {
            data: Vec::new(),
            calls: 0,
            fail_on: 1,
        };
        let mut writer = CsvSampleWriter::from_writer(sink, "flaky").unwrap();

        let timestamps = [0.0, 0.01, 0.02];
        let values = [1.0, 2.0, 3.0];
        assert!(writer.write_samples(&timestamps, &values).is_err());
        assert_eq!(writer.rows_written(), 0);
        writer.write_samples(&timestamps, &values).unwrap();
        assert_eq!(writer.rows_written(), 3);

        let content = String::from_utf8(writer.into_inner().unwrap().data).unwrap();
        assert_eq!(content, "timestamp,value\n0,1\n0.01,2\n0.02,3\n");
    }

    #[test]
    fn test_memory_writer_shares_state() {
        let writer = MemoryWriter::new();
        let mut handle = writer.clone();
        handle.write_samples(&[1.0, 2.0], &[10.0, 20.0]).unwrap();

        assert_eq!(writer.chunk_count(), 1);
        assert_eq!(writer.samples()[1], Sample { timestamp: 2.0, value: 20.0 });
    }

    #[test]
    fn test_writer_config_tagged() {
        let config: WriterConfig =
            serde_json::from_str(r#"{"type":"csv","path":"/tmp/out.csv"}"#).unwrap();
        assert_eq!(
            config,
            WriterConfig::Csv {
                path: PathBuf::from("/tmp/out.csv")
            }
        );
    }
}
