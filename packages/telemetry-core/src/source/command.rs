// Child-process line source
//
// Spawns a command (typically a remote acquisition script wrapped in ssh) and
// streams its standard output. Standard error is forwarded to the log.

use super::{LineSource, SourceMetadata};
use crate::error::{TelemetryError, TelemetryResult};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

pub struct CommandLineSource {
    program: String,
    args: Vec<String>,
    child: Option<Child>,
    lines_sent: u64,
}

impl CommandLineSource {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> TelemetryResult<Self> {
        let program = program.into();
        if program.trim().is_empty() {
            return Err(TelemetryError::config("command source needs a program"));
        }
        Ok(Self {
            program,
            args,
            child: None,
            lines_sent: 0,
        })
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl LineSource for CommandLineSource {
    async fn connect(&mut self) -> TelemetryResult<()> {
        if self.child.is_some() {
            return Ok(());
        }

        log::info!("Spawning `{}`", self.command_line());
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TelemetryError::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to spawn {}: {}", self.program, e),
                ))
            })?;

        if let Some(stderr) = child.stderr.take() {
            let program = self.program.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::warn!("[{}] {}", program, line);
                }
            });
        }

        self.child = Some(child);
        Ok(())
    }

    async fn start(&mut self, sender: mpsc::Sender<String>) -> TelemetryResult<()> {
        self.connect().await?;

        let stdout = self
            .child
            .as_mut()
            .and_then(|child| child.stdout.take())
            .ok_or_else(|| TelemetryError::Network("child stdout already consumed".into()))?;

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if sender.send(line).await.is_err() {
                log::info!("Line receiver closed, stopping `{}`", self.command_line());
                return self.stop().await;
            }
            self.lines_sent += 1;
        }

        if let Some(mut child) = self.child.take() {
            let status = child.wait().await?;
            if status.success() {
                log::info!("`{}` exited after {} lines", self.command_line(), self.lines_sent);
            } else {
                log::warn!("`{}` exited with {}", self.command_line(), status);
            }
        }
        Ok(())
    }

    async fn stop(&mut self) -> TelemetryResult<()> {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                log::debug!("Child already gone: {}", e);
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.child.is_some()
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            kind: "command".to_string(),
            origin: self.command_line(),
            lines_sent: self.lines_sent,
        }
    }
}
