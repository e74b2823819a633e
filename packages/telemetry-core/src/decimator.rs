// Block / sliding-window decimation with optional envelope and smoothing
//
// Reduces a raw stream at `sensor_fs` to roughly `plot_fs` by emitting one
// point per window of `D = floor(sensor_fs / plot_fs)` samples. Each point is
// the window mean, optionally with the window min/max (envelope), stamped at
// the window midpoint.

use crate::error::{TelemetryError, TelemetryResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest window `sensor_fs / plot_fs` may describe
pub const MAX_DECIMATION_FACTOR: usize = 1_000_000;

/// Window slots reserved up front; larger windows grow on demand
const PREALLOCATED_WINDOW: usize = 4096;

/// How consecutive windows relate to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
    /// Non-overlapping windows
    #[default]
    Block,

    /// Overlapping windows advancing by `stride` samples
    Sliding,
}

impl FromStr for WindowMode {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(WindowMode::Block),
            "sliding" => Ok(WindowMode::Sliding),
            other => Err(TelemetryError::config(format!(
                "unsupported window mode '{}' (expected block or sliding)",
                other
            ))),
        }
    }
}

impl fmt::Display for WindowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowMode::Block => f.write_str("block"),
            WindowMode::Sliding => f.write_str("sliding"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecimationConfig {
    pub sensor_fs: f64,
    pub plot_fs: f64,
    #[serde(default)]
    pub use_envelope: bool,
    #[serde(default)]
    pub window_mode: WindowMode,
    /// Single-pole smoothing factor in (0, 1]
    #[serde(default)]
    pub smoothing_alpha: Option<f64>,
    /// Samples between sliding windows; defaults to half a window
    #[serde(default)]
    pub stride: Option<usize>,
}

impl Default for DecimationConfig {
    fn default() -> Self {
        Self {
            sensor_fs: 100.0,
            plot_fs: 25.0,
            use_envelope: false,
            window_mode: WindowMode::Block,
            smoothing_alpha: None,
            stride: None,
        }
    }
}

impl DecimationConfig {
    pub fn new(sensor_fs: f64, plot_fs: f64) -> Self {
        Self {
            sensor_fs,
            plot_fs,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> TelemetryResult<()> {
        if !(self.sensor_fs.is_finite() && self.sensor_fs > 0.0) {
            return Err(TelemetryError::config(format!(
                "sensor_fs must be > 0, got {}",
                self.sensor_fs
            )));
        }
        if !(self.plot_fs.is_finite() && self.plot_fs > 0.0) {
            return Err(TelemetryError::config(format!(
                "plot_fs must be > 0, got {}",
                self.plot_fs
            )));
        }
        let ratio = self.sensor_fs / self.plot_fs;
        if !ratio.is_finite() || ratio.floor() > MAX_DECIMATION_FACTOR as f64 {
            return Err(TelemetryError::config(format!(
                "sensor_fs / plot_fs must describe at most {} samples per window, got {}",
                MAX_DECIMATION_FACTOR, ratio
            )));
        }
        if let Some(alpha) = self.smoothing_alpha {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(TelemetryError::config(format!(
                    "smoothing_alpha must be in (0, 1], got {}",
                    alpha
                )));
            }
        }
        if let Some(stride) = self.stride {
            let factor = self.decimation_factor();
            if stride == 0 || stride > factor {
                return Err(TelemetryError::config(format!(
                    "stride must be in [1, {}], got {}",
                    factor, stride
                )));
            }
        }
        Ok(())
    }

    /// `floor(sensor_fs / plot_fs)`, never below 1
    pub fn decimation_factor(&self) -> usize {
        ((self.sensor_fs / self.plot_fs).floor() as usize).max(1)
    }

    /// Samples dropped from the front of the window after each emission
    pub fn effective_stride(&self) -> usize {
        let factor = self.decimation_factor();
        match self.window_mode {
            WindowMode::Block => factor,
            WindowMode::Sliding => self
                .stride
                .unwrap_or_else(|| (factor / 2).min(factor).max(1)),
        }
    }
}

/// Windows completed by one `process` call, as parallel arrays
///
/// `min`/`max` are present (possibly empty) exactly when the envelope is on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecimatedBlock {
    pub timestamps: Vec<f64>,
    pub mean: Vec<f64>,
    pub min: Option<Vec<f64>>,
    pub max: Option<Vec<f64>>,
}

impl DecimatedBlock {
    fn with_envelope(use_envelope: bool) -> Self {
        Self {
            timestamps: Vec::new(),
            mean: Vec::new(),
            min: use_envelope.then(Vec::new),
            max: use_envelope.then(Vec::new),
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Stateful reducer for one raw stream
pub struct Decimator {
    config: DecimationConfig,
    factor: usize,
    stride: usize,
    acc_values: Vec<f64>,
    acc_times: Vec<f64>,
    smoothed: Option<f64>,
    windows_emitted: u64,
}

impl Decimator {
    pub fn new(config: DecimationConfig) -> TelemetryResult<Self> {
        config.validate()?;
        let factor = config.decimation_factor();
        let stride = config.effective_stride();
        Ok(Self {
            config,
            factor,
            stride,
            acc_values: Vec::with_capacity(factor.min(PREALLOCATED_WINDOW)),
            acc_times: Vec::with_capacity(factor.min(PREALLOCATED_WINDOW)),
            smoothed: None,
            windows_emitted: 0,
        })
    }

    pub fn config(&self) -> &DecimationConfig {
        &self.config
    }

    pub fn decimation_factor(&self) -> usize {
        self.factor
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Samples waiting in the current window
    pub fn pending(&self) -> usize {
        self.acc_values.len()
    }

    pub fn windows_emitted(&self) -> u64 {
        self.windows_emitted
    }

    /// Decimate a contiguous block sampled at `sensor_fs` from `start_time`
    pub fn process<T>(&mut self, values: &[T], start_time: f64) -> DecimatedBlock
    where
        T: Copy + Into<f64>,
    {
        let dt = 1.0 / self.config.sensor_fs;
        let mut out = DecimatedBlock::with_envelope(self.config.use_envelope);
        for (i, &value) in values.iter().enumerate() {
            self.push(start_time + i as f64 * dt, value.into(), &mut out);
        }
        out
    }

    /// Decimate samples that carry their own timestamps
    pub fn process_timed<T>(
        &mut self,
        timestamps: &[f64],
        values: &[T],
    ) -> TelemetryResult<DecimatedBlock>
    where
        T: Copy + Into<f64>,
    {
        if timestamps.len() != values.len() {
            return Err(TelemetryError::LengthMismatch {
                timestamps: timestamps.len(),
                values: values.len(),
            });
        }

        let mut out = DecimatedBlock::with_envelope(self.config.use_envelope);
        for (&ts, &value) in timestamps.iter().zip(values) {
            self.push(ts, value.into(), &mut out);
        }
        Ok(out)
    }

    /// Drop the partial window and smoothing memory, keeping configuration
    pub fn reset(&mut self) {
        self.acc_values.clear();
        self.acc_times.clear();
        self.smoothed = None;
    }

    fn push(&mut self, timestamp: f64, raw: f64, out: &mut DecimatedBlock) {
        let value = match self.config.smoothing_alpha {
            Some(alpha) => {
                let y = match self.smoothed {
                    Some(prev) => prev + alpha * (raw - prev),
                    None => raw,
                };
                self.smoothed = Some(y);
                y
            }
            None => raw,
        };

        self.acc_values.push(value);
        self.acc_times.push(timestamp);
        if self.acc_values.len() == self.factor {
            self.emit(out);
        }
    }

    fn emit(&mut self, out: &mut DecimatedBlock) {
        let window = &self.acc_values;
        let sum: f64 = window.iter().sum();
        let mean = sum / window.len() as f64;
        let window_start = self.acc_times[0];

        out.timestamps
            .push(window_start + 0.5 * self.factor as f64 / self.config.sensor_fs);
        out.mean.push(mean);
        if let (Some(min), Some(max)) = (out.min.as_mut(), out.max.as_mut()) {
            min.push(window.iter().copied().fold(f64::INFINITY, f64::min));
            max.push(window.iter().copied().fold(f64::NEG_INFINITY, f64::max));
        }
        self.windows_emitted += 1;

        // Block mode: stride == factor, so this empties the window
        self.acc_values.drain(..self.stride);
        self.acc_times.drain(..self.stride);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    fn envelope_config() -> DecimationConfig {
        DecimationConfig {
            use_envelope: true,
            ..DecimationConfig::new(100.0, 25.0)
        }
    }

    #[test]
    fn test_twelve_sample_block_scenario() {
        let mut dec = Decimator::new(envelope_config()).unwrap();
        let values: Vec<f64> = (1..=12).map(|v| v as f64).collect();
        let out = dec.process(&values, 0.0);

        assert!(approx(&out.mean, &[2.5, 6.5, 10.5]));
        assert!(approx(out.min.as_ref().unwrap(), &[1.0, 5.0, 9.0]));
        assert!(approx(out.max.as_ref().unwrap(), &[4.0, 8.0, 12.0]));
        assert!(approx(&out.timestamps, &[0.02, 0.06, 0.10]));
        assert_eq!(dec.pending(), 0);
    }

    #[test]
    fn test_constant_signal() {
        let mut dec = Decimator::new(envelope_config()).unwrap();
        let out = dec.process(&[3.25f32; 40], 10.0);
        assert_eq!(out.len(), 10);
        assert!(out.mean.iter().all(|m| *m == 3.25));
        assert!(out.min.unwrap().iter().all(|m| *m == 3.25));
        assert!(out.max.unwrap().iter().all(|m| *m == 3.25));
    }

    #[test]
    fn test_block_emits_floor_n_over_d() {
        for n in [0usize, 1, 3, 4, 5, 17, 100, 103] {
            let mut dec = Decimator::new(DecimationConfig::new(100.0, 25.0)).unwrap();
            let values = vec![1.0; n];
            let out = dec.process(&values, 0.0);
            assert_eq!(out.len(), n / 4, "n = {n}");
            assert_eq!(dec.pending(), n % 4);
        }
    }

    #[test]
    fn test_partial_window_completes_on_next_block() {
        let mut dec = Decimator::new(envelope_config()).unwrap();
        assert!(dec.process(&[1.0, 2.0, 3.0], 0.0).is_empty());
        let out = dec.process(&[4.0, 5.0], 0.03);
        assert!(approx(&out.mean, &[2.5]));
        // Window started at the first sample of the earlier block
        assert!(approx(&out.timestamps, &[0.02]));
        assert_eq!(dec.pending(), 1);
    }

    #[test]
    fn test_envelope_bounds_mean() {
        let mut dec = Decimator::new(DecimationConfig {
            smoothing_alpha: Some(0.3),
            window_mode: WindowMode::Sliding,
            ..envelope_config()
        })
        .unwrap();
        let values: Vec<f64> = (0..500).map(|i| ((i * 37) % 11) as f64 - 5.0).collect();
        let out = dec.process(&values, 0.0);
        let (min, max) = (out.min.unwrap(), out.max.unwrap());
        for i in 0..out.mean.len() {
            assert!(min[i] <= out.mean[i] + 1e-12);
            assert!(out.mean[i] <= max[i] + 1e-12);
        }
    }

    #[test]
    fn test_empty_input_shapes() {
        let mut dec = Decimator::new(envelope_config()).unwrap();
        let out = dec.process::<f64>(&[], 0.0);
        assert!(out.is_empty());
        assert_eq!(out.min, Some(vec![]));
        assert_eq!(out.max, Some(vec![]));

        let mut plain = Decimator::new(DecimationConfig::new(100.0, 25.0)).unwrap();
        let out = plain.process::<f64>(&[], 0.0);
        assert!(out.min.is_none() && out.max.is_none());
    }

    #[test]
    fn test_factor_one_emits_every_sample() {
        // sensor_fs < plot_fs still yields D = 1
        let mut dec = Decimator::new(DecimationConfig::new(10.0, 50.0)).unwrap();
        assert_eq!(dec.decimation_factor(), 1);
        let out = dec.process(&[1.0, 2.0, 3.0], 0.0);
        assert!(approx(&out.mean, &[1.0, 2.0, 3.0]));
        assert!(approx(&out.timestamps, &[0.05, 0.15, 0.25]));
    }

    #[test]
    fn test_sliding_windows_overlap() {
        let mut dec = Decimator::new(DecimationConfig {
            window_mode: WindowMode::Sliding,
            ..DecimationConfig::new(100.0, 25.0)
        })
        .unwrap();
        assert_eq!(dec.stride(), 2);

        let values: Vec<f64> = (1..=8).map(|v| v as f64).collect();
        let out = dec.process(&values, 0.0);
        // Windows [1..4], [3..6], [5..8]
        assert!(approx(&out.mean, &[2.5, 4.5, 6.5]));
        assert!(approx(&out.timestamps, &[0.02, 0.04, 0.06]));
        assert!(out.timestamps.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(dec.pending(), 2);
    }

    #[test]
    fn test_smoothing_seeded_with_first_sample() {
        let mut dec = Decimator::new(DecimationConfig {
            smoothing_alpha: Some(0.5),
            ..DecimationConfig::new(10.0, 10.0)
        })
        .unwrap();
        let out = dec.process(&[4.0, 8.0, 8.0], 0.0);
        assert!(approx(&out.mean, &[4.0, 6.0, 7.0]));

        dec.reset();
        let out = dec.process(&[10.0], 1.0);
        assert!(approx(&out.mean, &[10.0]));
    }

    #[test]
    fn test_reset_discards_partial_window() {
        let mut dec = Decimator::new(DecimationConfig::new(100.0, 25.0)).unwrap();
        dec.process(&[100.0, 100.0, 100.0], 0.0);
        dec.reset();
        let out = dec.process(&[1.0, 1.0, 1.0, 1.0], 5.0);
        assert!(approx(&out.mean, &[1.0]));
        assert!(approx(&out.timestamps, &[5.02]));
    }

    #[test]
    fn test_process_timed_uses_sample_timestamps() {
        let mut dec = Decimator::new(DecimationConfig::new(100.0, 50.0)).unwrap();
        let out = dec
            .process_timed(&[7.0, 7.01, 7.5, 7.51], &[1i32, 3, 5, 7])
            .unwrap();
        assert!(approx(&out.mean, &[2.0, 6.0]));
        assert!(approx(&out.timestamps, &[7.01, 7.51]));

        assert!(matches!(
            dec.process_timed(&[0.0], &[1.0, 2.0]),
            Err(TelemetryError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad = [
            DecimationConfig::new(0.0, 25.0),
            DecimationConfig::new(100.0, -1.0),
            DecimationConfig {
                smoothing_alpha: Some(0.0),
                ..DecimationConfig::default()
            },
            DecimationConfig {
                smoothing_alpha: Some(1.5),
                ..DecimationConfig::default()
            },
            DecimationConfig {
                stride: Some(0),
                window_mode: WindowMode::Sliding,
                ..DecimationConfig::default()
            },
        ];
        for config in bad {
            assert!(Decimator::new(config).is_err());
        }
    }

    #[test]
    fn test_extreme_rate_ratio_rejected() {
        for config in [
            DecimationConfig::new(f64::MAX, f64::MIN_POSITIVE),
            DecimationConfig::new(1e6, 1e-6),
        ] {
            assert!(matches!(
                config.validate(),
                Err(TelemetryError::InvalidConfig(_))
            ));
            assert!(matches!(
                Decimator::new(config),
                Err(TelemetryError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_largest_window_allowed() {
        let config = DecimationConfig::new(MAX_DECIMATION_FACTOR as f64, 1.0);
        let mut dec = Decimator::new(config).unwrap();
        assert_eq!(dec.decimation_factor(), MAX_DECIMATION_FACTOR);

        let out = dec.process(&[1.0f64; 10][..], 0.0);
        assert!(out.is_empty());
        assert_eq!(dec.pending(), 10);
    }

    #[test]
    fn test_window_mode_parsing() {
        assert_eq!("Sliding".parse::<WindowMode>().unwrap(), WindowMode::Sliding);
        assert_eq!("block".parse::<WindowMode>().unwrap(), WindowMode::Block);
        assert!(matches!(
            "tumbling".parse::<WindowMode>(),
            Err(TelemetryError::InvalidConfig(_))
        ));
    }
}
