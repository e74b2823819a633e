// TCP line source
//
// Connects to a server that writes newline-delimited JSON. With `reconnect`
// set, a dropped connection is retried after a fixed delay.

use super::{LineSource, SourceMetadata};
use crate::error::{TelemetryError, TelemetryResult};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

pub struct TcpLineSource {
    host: String,
    port: u16,
    reconnect: bool,
    stream: Option<TcpStream>,
    lines_sent: u64,
}

impl TcpLineSource {
    pub fn new(host: impl Into<String>, port: u16, reconnect: bool) -> Self {
        Self {
            host: host.into(),
            port,
            reconnect,
            stream: None,
            lines_sent: 0,
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl LineSource for TcpLineSource {
    async fn connect(&mut self) -> TelemetryResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let addr = self.addr();
        log::info!("Connecting to tcp://{}", addr);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| TelemetryError::Network(format!("TCP connection to {} failed: {}", addr, e)))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn start(&mut self, sender: mpsc::Sender<String>) -> TelemetryResult<()> {
        loop {
            if let Err(e) = self.connect().await {
                if !self.reconnect {
                    return Err(e);
                }
                log::warn!("{}; retrying in {:?}", e, RECONNECT_DELAY);
                sleep(RECONNECT_DELAY).await;
                continue;
            }

            let Some(stream) = self.stream.take() else {
                continue;
            };
            let mut lines = BufReader::new(stream).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if sender.send(line).await.is_err() {
                            log::info!("Line receiver closed, leaving tcp://{}", self.addr());
                            return Ok(());
                        }
                        self.lines_sent += 1;
                    }
                    Ok(None) => {
                        log::info!("tcp://{} closed by peer", self.addr());
                        break;
                    }
                    Err(e) => {
                        log::error!("TCP read error on {}: {}", self.addr(), e);
                        break;
                    }
                }
            }

            if !self.reconnect {
                return Ok(());
            }
            log::info!("Reconnecting to tcp://{} in {:?}", self.addr(), RECONNECT_DELAY);
            sleep(RECONNECT_DELAY).await;
        }
    }

    async fn stop(&mut self) -> TelemetryResult<()> {
        self.stream = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            kind: "tcp".to_string(),
            origin: self.addr(),
            lines_sent: self.lines_sent,
        }
    }
}
