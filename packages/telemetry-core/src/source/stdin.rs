// Standard input line source

use super::{LineSource, SourceMetadata};
use crate::error::TelemetryResult;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Default)]
pub struct StdinLineSource {
    is_connected: bool,
    lines_sent: u64,
}

impl StdinLineSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LineSource for StdinLineSource {
    async fn connect(&mut self) -> TelemetryResult<()> {
        self.is_connected = true;
        Ok(())
    }

    async fn start(&mut self, sender: mpsc::Sender<String>) -> TelemetryResult<()> {
        self.is_connected = true;
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if sender.send(line).await.is_err() {
                break;
            }
            self.lines_sent += 1;
        }
        self.is_connected = false;
        log::info!("Standard input closed after {} lines", self.lines_sent);
        Ok(())
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
            kind: "stdin".to_string(),
            origin: "-".to_string(),
            lines_sent: self.lines_sent,
        }
    }
}
