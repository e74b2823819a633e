// File replay source
//
// Streams an NDJSON capture line by line, optionally paced and looped. Useful
// for replaying recorded sessions without the sensor attached.

use super::{LineSource, SourceMetadata};
use crate::error::{TelemetryError, TelemetryResult};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

pub struct FileLineSource {
    path: PathBuf,
    rate_limit_ms: Option<u64>,
    loop_playback: bool,
    is_connected: bool,
    lines_sent: u64,
}

impl FileLineSource {
    pub fn new(path: impl Into<PathBuf>, rate_limit_ms: Option<u64>, loop_playback: bool) -> Self {
        Self {
            path: path.into(),
            rate_limit_ms,
            loop_playback,
            is_connected: false,
            lines_sent: 0,
        }
    }
}

#[async_trait]
impl LineSource for FileLineSource {
    async fn connect(&mut self) -> TelemetryResult<()> {
        if self.is_connected {
            return Ok(());
        }
        let meta = tokio::fs::metadata(&self.path).await.map_err(|e| {
            TelemetryError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", self.path.display(), e),
            ))
        })?;
        if !meta.is_file() {
            return Err(TelemetryError::config(format!(
                "{} is not a regular file",
                self.path.display()
            )));
        }
        self.is_connected = true;
        log::info!("Opened {} for replay", self.path.display());
        Ok(())
    }

    async fn start(&mut self, sender: mpsc::Sender<String>) -> TelemetryResult<()> {
        if !self.is_connected {
            self.connect().await?;
        }

        loop {
            let file = File::open(&self.path).await?;
            let mut lines = BufReader::new(file).lines();

            while let Some(line) = lines.next_line().await? {
                if sender.send(line).await.is_err() {
                    log::info!("Line receiver closed, ending file replay");
                    return Ok(());
                }
                self.lines_sent += 1;

                if let Some(ms) = self.rate_limit_ms {
                    sleep(Duration::from_millis(ms)).await;
                }
            }

            if !self.loop_playback {
                log::info!(
                    "Reached end of {} after {} lines",
                    self.path.display(),
                    self.lines_sent
                );
                return Ok(());
            }
            log::debug!("Looping playback of {}", self.path.display());
        }
    }

    async fn stop(&mut self) -> TelemetryResult<()> {
        self.is_connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.is_connected
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            kind: "file".to_string(),
            origin: self.path.display().to_string(),
            lines_sent: self.lines_sent,
        }
    }
}
