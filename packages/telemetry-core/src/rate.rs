// Effective sample rate estimation
//
// Fuses the nominal rate a device reports in status records with the rate
// observed from a trailing window of sample timestamps. Advisory only: nothing
// downstream depends on the exact fusion formula.

use crate::error::{TelemetryError, TelemetryResult};
use crate::ring::RingBuffer;
use serde::{Deserialize, Serialize};

/// Where the effective rate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateQuality {
    StatusOnly,
    TsOnly,
    Fused,
    /// No input yet; the configured default is reported
    Default,
}

impl RateQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateQuality::StatusOnly => "status_only",
            RateQuality::TsOnly => "ts_only",
            RateQuality::Fused => "fused",
            RateQuality::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateEstimate {
    pub hz_effective: f64,
    pub hz_raw_status: Option<f64>,
    pub hz_ts_window: Option<f64>,
    pub quality: RateQuality,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Rate reported before any status or timestamp has arrived
    pub default_hz: f64,

    /// Weight of the reported rate when both sources exist, in [0, 1]
    pub status_weight: f64,

    /// Number of trailing timestamps kept by `observe`
    pub window_size: usize,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            default_hz: 100.0,
            status_weight: 0.5,
            window_size: 400,
        }
    }
}

impl RateConfig {
    pub fn validate(&self) -> TelemetryResult<()> {
        if !(self.default_hz.is_finite() && self.default_hz > 0.0) {
            return Err(TelemetryError::config(format!(
                "default_hz must be > 0, got {}",
                self.default_hz
            )));
        }
        if !(0.0..=1.0).contains(&self.status_weight) {
            return Err(TelemetryError::config(format!(
                "status_weight must be in [0, 1], got {}",
                self.status_weight
            )));
        }
        if self.window_size < 2 {
            return Err(TelemetryError::config(format!(
                "rate window_size must be >= 2, got {}",
                self.window_size
            )));
        }
        Ok(())
    }
}

pub struct RateController {
    config: RateConfig,
    hz_status: Option<f64>,
    hz_ts: Option<f64>,
    window: RingBuffer<f64>,
}

impl RateController {
    pub fn new(config: RateConfig) -> TelemetryResult<Self> {
        config.validate()?;
        let window = RingBuffer::new(config.window_size)?;
        Ok(Self {
            config,
            hz_status: None,
            hz_ts: None,
            window,
        })
    }

    pub fn config(&self) -> &RateConfig {
        &self.config
    }

    /// Record the rate from a device status report
    ///
    /// `hz` wins over `interval` (seconds between samples) when both are
    /// present. Non-positive or non-finite values are ignored.
    pub fn update_from_status(&mut self, interval: Option<f64>, hz: Option<f64>) {
        let reported = hz
            .filter(|hz| hz.is_finite() && *hz > 0.0)
            .or_else(|| {
                interval
                    .filter(|dt| dt.is_finite() && *dt > 0.0)
                    .map(|dt| 1.0 / dt)
            });

        match reported {
            Some(hz) => self.hz_status = Some(hz),
            None => log::debug!(
                "Ignoring status report without usable rate (interval={:?}, hz={:?})",
                interval,
                hz
            ),
        }
    }

    /// Recompute the observed rate as `(count - 1) / span`
    ///
    /// Fewer than two timestamps or a non-positive span leave the previous
    /// estimate untouched.
    pub fn update_from_timestamps(&mut self, timestamps: &[f64]) {
        if let Some(hz) = window_rate(timestamps.iter().copied()) {
            self.hz_ts = Some(hz);
        }
    }

    /// Push one timestamp into the trailing window and refresh the estimate
    ///
    /// Constant time: the span runs from the oldest to the newest timestamp
    /// held, so an out-of-order newest sample leaves the estimate unchanged.
    pub fn observe(&mut self, timestamp: f64) {
        if !timestamp.is_finite() {
            return;
        }
        self.window.append(timestamp);
        let count = self.window.len();
        if let (Some(first), Some(last)) = (self.window.first(), self.window.last()) {
            let span = last - first;
            if count >= 2 && span > 0.0 {
                self.hz_ts = Some((count - 1) as f64 / span);
            }
        }
    }

    pub fn estimate(&self) -> RateEstimate {
        let (hz_effective, quality) = match (self.hz_status, self.hz_ts) {
            (Some(status), Some(ts)) => {
                let w = self.config.status_weight;
                (w * status + (1.0 - w) * ts, RateQuality::Fused)
            }
            (Some(status), None) => (status, RateQuality::StatusOnly),
            (None, Some(ts)) => (ts, RateQuality::TsOnly),
            (None, None) => (self.config.default_hz, RateQuality::Default),
        };

        RateEstimate {
            hz_effective,
            hz_raw_status: self.hz_status,
            hz_ts_window: self.hz_ts,
            quality,
        }
    }

    /// Forget every input, keeping the configuration
    pub fn reset(&mut self) {
        self.hz_status = None;
        self.hz_ts = None;
        self.window.clear();
    }
}

// Span is taken from min/max so a single late sample cannot flip the sign
fn window_rate(timestamps: impl Iterator<Item = f64>) -> Option<f64> {
    let mut count = 0usize;
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for ts in timestamps {
        count += 1;
        lo = lo.min(ts);
        hi = hi.max(ts);
    }

    let span = hi - lo;
    if count < 2 || !(span > 0.0) {
        return None;
    }
    Some((count - 1) as f64 / span)
}
