// Top-level configuration
//
// Loaded from a JSON file, then overridden from `TELEMETRY_*` environment
// variables, then (in the CLI) from flags.

use crate::error::{TelemetryError, TelemetryResult};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::rate::RateConfig;
use crate::session::{IngestSession, SessionConfig};
use crate::source::LineSourceConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;

pub const ENV_SENSOR_FS: &str = "TELEMETRY_SENSOR_FS";
pub const ENV_BUFFER_CAPACITY: &str = "TELEMETRY_BUFFER_CAPACITY";
pub const ENV_PLOT_FS: &str = "TELEMETRY_PLOT_FS";
pub const ENV_STREAM_FS: &str = "TELEMETRY_STREAM_FS";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub session: SessionConfig,
    pub pipeline: PipelineConfig,
    pub rate: RateConfig,
    pub source: LineSourceConfig,
}

impl TelemetryConfig {
    /// Load a JSON config file; missing sections take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> TelemetryResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TelemetryError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        let config: Self = serde_json::from_str(&text)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Override fields from the process environment
    pub fn apply_env(&mut self) -> TelemetryResult<()> {
        self.apply_env_from(|key| env::var(key).ok())
    }

    /// Override fields from `lookup`, which maps a variable name to its value
    pub fn apply_env_from<F>(&mut self, lookup: F) -> TelemetryResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(fs) = parse_var::<f64, _>(&lookup, ENV_SENSOR_FS)? {
            self.pipeline.sensor_fs = fs;
        }
        if let Some(capacity) = parse_var::<usize, _>(&lookup, ENV_BUFFER_CAPACITY)? {
            self.session.buffer_capacity = capacity;
        }
        if let Some(fs) = parse_var::<f64, _>(&lookup, ENV_PLOT_FS)? {
            self.pipeline.plotter.plot_fs = fs;
        }
        if let Some(fs) = parse_var::<f64, _>(&lookup, ENV_STREAM_FS)? {
            self.pipeline.streamer.stream_fs = fs;
        }
        Ok(())
    }

    pub fn validate(&self) -> TelemetryResult<()> {
        self.session.validate()?;
        self.rate.validate()?;
        self.pipeline.validate()
    }

    /// Whether any sink would do work
    pub fn pipeline_enabled(&self) -> bool {
        self.pipeline.recorder.enabled
            || self.pipeline.streamer.enabled
            || self.pipeline.plotter.enabled
    }

    /// Build an idle session with its pipeline wired to the tapped channel
    pub fn build_session(&self) -> TelemetryResult<IngestSession> {
        self.validate()?;

        let pipeline = if self.pipeline_enabled() {
            if self.session.tap.is_none() {
                return Err(TelemetryError::config(
                    "pipeline sinks are enabled but no channel is tapped",
                ));
            }
            Some(Pipeline::from_config(&self.pipeline)?)
        } else {
            None
        };

        IngestSession::new(self.session.clone(), self.rate.clone(), pipeline)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> TelemetryResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| TelemetryError::config(format!("{}={:?}: {}", key, raw, e))),
        _ => Ok(None),
    }
}
