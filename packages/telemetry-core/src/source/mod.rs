// Pluggable line sources
//
// A `LineSource` produces raw text lines (one encoded record per line) into an
// async channel. The session's receiver task decodes them. New sources are
// added by implementing the trait, adding a `LineSourceConfig` variant and a
// match arm in `create_source`.

mod command;
mod file;
mod stdin;
mod tcp;

pub use command::CommandLineSource;
pub use file::FileLineSource;
pub use stdin::StdinLineSource;
pub use tcp::TcpLineSource;

use crate::error::TelemetryResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Where raw lines come from
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LineSourceConfig {
    /// Replay an NDJSON file
    File {
        path: PathBuf,
        /// Delay between lines in milliseconds
        #[serde(default)]
        rate_limit_ms: Option<u64>,
        /// Start over at end of file
        #[serde(default)]
        loop_playback: bool,
    },

    /// NDJSON over a TCP connection
    Tcp {
        host: String,
        port: u16,
        #[serde(default)]
        reconnect: bool,
    },

    /// Standard output of a child process, e.g. a remote script over ssh
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },

    /// This process's standard input
    #[default]
    Stdin,
}

/// Descriptive information about a source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Source kind, e.g. `"tcp"`
    pub kind: String,
    /// Human-readable origin (path, address, command line)
    pub origin: String,
    pub lines_sent: u64,
}

/// Producer of raw text lines
#[async_trait]
pub trait LineSource: Send + Sync {
    /// Open the underlying input
    async fn connect(&mut self) -> TelemetryResult<()>;

    /// Send lines until the input ends, the receiver closes, or an error occurs
    async fn start(&mut self, sender: mpsc::Sender<String>) -> TelemetryResult<()>;

    /// Release the underlying input
    async fn stop(&mut self) -> TelemetryResult<()>;

    fn is_connected(&self) -> bool;

    fn metadata(&self) -> SourceMetadata;
}

pub fn create_source(config: LineSourceConfig) -> TelemetryResult<Box<dyn LineSource>> {
    match config {
        LineSourceConfig::File {
            path,
            rate_limit_ms,
            loop_playback,
        } => Ok(Box::new(FileLineSource::new(
            path,
            rate_limit_ms,
            loop_playback,
        ))),

        LineSourceConfig::Tcp {
            host,
            port,
            reconnect,
        } => Ok(Box::new(TcpLineSource::new(host, port, reconnect))),

        LineSourceConfig::Command { program, args } => {
            Ok(Box::new(CommandLineSource::new(program, args)?))
        }

        LineSourceConfig::Stdin => Ok(Box::new(StdinLineSource::new())),
    }
}
