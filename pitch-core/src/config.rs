//! Analysis session configuration.
//!
//! Every tunable of the pipeline is fixed when a session is created.
//! An invalid combination is rejected up front, before any device is
//! opened, so the processing code never has to re-check it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by [`AnalyzerConfig::validate`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("fft_size must be a power of two of at least {min}, got {got}")]
    BadFftSize { min: usize, got: usize },
    #[error("step must be between 1 and fft_size ({fft_size}), got {got}")]
    BadStep { fft_size: usize, got: usize },
    #[error("frequency bounds must satisfy 0 < min < max < sample_rate / 2, got {min}..{max} at {rate} Hz")]
    BadFreqRange { min: f32, max: f32, rate: u32 },
    #[error("chunk_size must be nonzero")]
    BadChunkSize,
    #[error("base_freq must be positive, got {0}")]
    BadBaseFreq(f32),
}

/// Tunables for one analysis session.
///
/// The defaults are sized for singing voice at CD sample rate: a
/// 2048-sample window gives ~21.5 Hz bins (~46 ms of audio) at
/// 44.1 kHz, and a 512-sample step keeps the phase correction within
/// its working range of two bins either side of center.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// FFT window size in samples (power of two).
    pub fft_size: usize,
    /// Samples to advance between successive windows.
    pub step: usize,
    /// Lower bound of the fundamental search range in Hz.
    pub min_freq: f32,
    /// Upper bound of the fundamental search range in Hz.
    pub max_freq: f32,
    /// Bins quieter than this (dBFS) never become fundamental candidates.
    pub noise_floor_db: f32,
    /// Reference frequency of A4 for the note scale.
    pub base_freq: f32,
    /// Samples per frame delivered by the capture callback.
    pub chunk_size: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            fft_size: 2048,
            step: 512,
            min_freq: 80.0,
            max_freq: 1100.0,
            noise_floor_db: -60.0,
            base_freq: 440.0,
            chunk_size: 1024,
        }
    }
}

impl AnalyzerConfig {
    /// Smallest accepted FFT window.
    pub const MIN_FFT_SIZE: usize = 256;

    /// Checks the configuration for combinations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fft_size < Self::MIN_FFT_SIZE || !self.fft_size.is_power_of_two() {
            return Err(ConfigError::BadFftSize {
                min: Self::MIN_FFT_SIZE,
                got: self.fft_size,
            });
        }
        if self.step == 0 || self.step > self.fft_size {
            return Err(ConfigError::BadStep {
                fft_size: self.fft_size,
                got: self.step,
            });
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        if !(self.min_freq > 0.0 && self.min_freq < self.max_freq && self.max_freq < nyquist) {
            return Err(ConfigError::BadFreqRange {
                min: self.min_freq,
                max: self.max_freq,
                rate: self.sample_rate,
            });
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::BadChunkSize);
        }
        if !(self.base_freq > 0.0) {
            return Err(ConfigError::BadBaseFreq(self.base_freq));
        }
        Ok(())
    }

    /// Width of one FFT bin in Hz.
    pub fn freq_per_bin(&self) -> f32 {
        self.sample_rate as f32 / self.fft_size as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(AnalyzerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_window() {
        let config = AnalyzerConfig {
            fft_size: 1000,
            ..AnalyzerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadFftSize { got: 1000, .. })
        ));
    }

    #[test]
    fn rejects_tiny_window() {
        let config = AnalyzerConfig {
            fft_size: 128,
            step: 64,
            ..AnalyzerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BadFftSize { .. })));
    }

    #[test]
    fn rejects_oversized_step() {
        let config = AnalyzerConfig {
            step: 4096,
            ..AnalyzerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BadStep { .. })));
    }

    #[test]
    fn rejects_zero_step() {
        let config = AnalyzerConfig {
            step: 0,
            ..AnalyzerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BadStep { .. })));
    }

    #[test]
    fn rejects_inverted_frequency_bounds() {
        let config = AnalyzerConfig {
            min_freq: 1100.0,
            max_freq: 80.0,
            ..AnalyzerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BadFreqRange { .. })));
    }

    #[test]
    fn rejects_bounds_beyond_nyquist() {
        let config = AnalyzerConfig {
            max_freq: 30_000.0,
            ..AnalyzerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BadFreqRange { .. })));
    }

    #[test]
    fn json_round_trip() {
        let config = AnalyzerConfig {
            fft_size: 4096,
            step: 1024,
            min_freq: 60.0,
            ..AnalyzerConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: AnalyzerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.fft_size, 4096);
        assert_eq!(back.step, 1024);
        assert_eq!(back.min_freq, 60.0);
        assert_eq!(back.sample_rate, config.sample_rate);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: AnalyzerConfig = serde_json::from_str(r#"{"fft_size": 1024}"#).unwrap();
        assert_eq!(config.fft_size, 1024);
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.max_freq, 1100.0);
    }
}
