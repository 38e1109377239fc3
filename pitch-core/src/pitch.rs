//! # Pitch Estimation Module
//!
//! Selects the fundamental frequency from a corrected spectral frame.
//!
//! The estimator scans the plausible vocal range for the strongest
//! local-maximum bin, reads its phase-corrected frequency, and gates it
//! against both an absolute noise floor and the frame's own peak so
//! that broadband noise never produces a pitch. Sung vowels often carry
//! more energy in an overtone than in the fundamental, so an accepted
//! peak is probed at integer subdivisions of its frequency and replaced
//! by a matching lower peak when one exists.
//!
//! No smoothing happens here; consecutive windows are estimated
//! independently and any display smoothing is left to the consumer.

use crate::PitchEstimate;
use crate::analyzer::SpectralFrame;
use crate::config::AnalyzerConfig;

/// Candidates quieter than this fraction of the frame's strongest bin
/// are rejected as noise.
const RELATIVE_PEAK_FLOOR: f32 = 0.1;

/// A lower peak counts as the fundamental of a probed subdivision only
/// if its corrected frequency matches within this relative tolerance.
const HARMONIC_TOLERANCE: f32 = 0.03;

/// Smallest acceptable magnitude of a subdivision peak, relative to the
/// peak it would replace.
const SUBHARMONIC_MIN_RATIO: f32 = 0.1;

/// How high a harmonic may stand in for its fundamental.
const MAX_DIVISOR: usize = 4;

/// Guard band applied at the search range edges so a tone sitting
/// exactly on a bound is not lost to rounding.
const RANGE_GUARD_HZ: f32 = 0.1;

/// Estimates the fundamental frequency of one spectral frame.
///
/// Returns an estimate with `frequency: None` when the frame holds no
/// confident fundamental (silence, noise, or only out-of-range tones).
/// The note fields are left unset; they belong to whoever owns the
/// scale. Deterministic for identical frames.
pub fn estimate(frame: &SpectralFrame, config: &AnalyzerConfig) -> PitchEstimate {
    let mut result = PitchEstimate {
        level: frame.peak_level,
        ..PitchEstimate::default()
    };

    let bins = frame.magnitudes.len();
    if bins < 3 {
        return result;
    }

    let floor = 10.0_f32.powf(config.noise_floor_db / 20.0);
    let lo = config.min_freq - RANGE_GUARD_HZ;
    let hi = config.max_freq + RANGE_GUARD_HZ;
    let freq_per_bin = config.freq_per_bin();

    let global_peak = frame.magnitudes[1..].iter().copied().fold(0.0_f32, f32::max);
    if global_peak < floor {
        return result;
    }

    let k_min = ((lo / freq_per_bin) as usize).max(1);
    let k_max = ((hi / freq_per_bin).ceil() as usize).min(bins - 2);

    let mut best: Option<usize> = None;
    for k in k_min..=k_max {
        let m = frame.magnitudes[k];
        if m < floor || m < RELATIVE_PEAK_FLOOR * global_peak {
            continue;
        }
        // Leakage shoulders are not candidates, only local maxima.
        if m < frame.magnitudes[k - 1] || m < frame.magnitudes[k + 1] {
            continue;
        }
        let freq = frame.frequencies[k];
        if freq < lo || freq > hi {
            continue;
        }
        if best.map_or(true, |b| m > frame.magnitudes[b]) {
            best = Some(k);
        }
    }

    if let Some(peak) = best {
        let k = resolve_fundamental(frame, peak, lo, floor, freq_per_bin);
        result.frequency = Some(frame.frequencies[k]);
    }
    result
}

/// Probes integer subdivisions of a peak's frequency and returns the
/// bin of the deepest subdivision backed by a matching peak, falling
/// back to the peak itself.
fn resolve_fundamental(
    frame: &SpectralFrame,
    peak: usize,
    lo: f32,
    floor: f32,
    freq_per_bin: f32,
) -> usize {
    let peak_freq = frame.frequencies[peak];
    let peak_mag = frame.magnitudes[peak];
    let mut resolved = peak;

    for div in 2..=MAX_DIVISOR {
        let target = peak_freq / div as f32;
        if target < lo {
            break;
        }
        let center = (target / freq_per_bin).round() as usize;
        if center < 1 || center + 1 >= frame.magnitudes.len() {
            continue;
        }
        // Strongest of the three bins around the expected position.
        let k = (center - 1..=center + 1)
            .max_by(|&a, &b| frame.magnitudes[a].total_cmp(&frame.magnitudes[b]))
            .unwrap_or(center);
        let mag = frame.magnitudes[k];
        if mag < floor || mag < SUBHARMONIC_MIN_RATIO * peak_mag {
            continue;
        }
        if (frame.frequencies[k] / target - 1.0).abs() > HARMONIC_TOLERANCE {
            continue;
        }
        resolved = k;
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Analyzer;

    fn sine(freq: f32, rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let phase =
                    2.0 * std::f64::consts::PI * freq as f64 * i as f64 / rate as f64;
                amplitude * phase.sin() as f32
            })
            .collect()
    }

    /// Runs a signal through the analyzer and estimates the last window,
    /// so the phase state has settled.
    fn estimate_signal(samples: &[f32], config: &AnalyzerConfig) -> PitchEstimate {
        let mut analyzer = Analyzer::new(config);
        analyzer.input(samples);
        let frame = analyzer.process().expect("enough samples for a window");
        estimate(frame, config)
    }

    fn estimate_tone(freq: f32, config: &AnalyzerConfig) -> PitchEstimate {
        let samples = sine(freq, config.sample_rate, 4 * config.fft_size, 0.5);
        estimate_signal(&samples, config)
    }

    #[test]
    fn pure_tone_is_estimated_within_half_a_hertz() {
        let config = AnalyzerConfig::default();
        let result = estimate_tone(440.0, &config);
        let freq = result.frequency.expect("a pitch");
        assert!((freq - 440.0).abs() < 0.5, "estimated {freq} Hz");
    }

    #[test]
    fn silence_yields_no_pitch() {
        let config = AnalyzerConfig::default();
        let samples = vec![0.0; 4 * config.fft_size];
        let result = estimate_signal(&samples, &config);
        assert_eq!(result.frequency, None);
        assert_eq!(result.level, 0.0);
    }

    #[test]
    fn tones_at_the_range_bounds_are_still_detected() {
        let config = AnalyzerConfig::default();

        let low = estimate_tone(config.min_freq, &config);
        let freq = low.frequency.expect("a pitch at the lower bound");
        assert!((freq - config.min_freq).abs() < 0.5, "estimated {freq} Hz");

        let high = estimate_tone(config.max_freq, &config);
        let freq = high.frequency.expect("a pitch at the upper bound");
        assert!((freq - config.max_freq).abs() < 0.5, "estimated {freq} Hz");
    }

    #[test]
    fn tones_outside_the_range_are_rejected() {
        let config = AnalyzerConfig::default();
        assert_eq!(estimate_tone(60.0, &config).frequency, None);
        assert_eq!(estimate_tone(1400.0, &config).frequency, None);
    }

    #[test]
    fn correction_beats_the_naive_bin_center() {
        let config = AnalyzerConfig::default();
        // 445 Hz sits well off the nearest bin centers (~430.7 and
        // ~452.2 Hz at the default resolution).
        let true_freq = 445.0;
        let result = estimate_tone(true_freq, &config);
        let estimated = result.frequency.expect("a pitch");

        let naive_bin = (true_freq / config.freq_per_bin()).round();
        let naive = naive_bin * config.freq_per_bin();

        assert!(
            (estimated - true_freq).abs() < (naive - true_freq).abs(),
            "estimated {estimated} Hz, naive {naive} Hz"
        );
        assert!((estimated - true_freq).abs() < 0.5, "estimated {estimated} Hz");
    }

    #[test]
    fn dominant_second_harmonic_still_resolves_to_the_fundamental() {
        let config = AnalyzerConfig::default();
        let rate = config.sample_rate;
        let len = 4 * config.fft_size;
        let fundamental = sine(220.0, rate, len, 0.3);
        let overtone = sine(440.0, rate, len, 0.6);
        let samples: Vec<f32> = fundamental
            .iter()
            .zip(&overtone)
            .map(|(a, b)| a + b)
            .collect();

        let result = estimate_signal(&samples, &config);
        let freq = result.frequency.expect("a pitch");
        assert!((freq - 220.0).abs() < 1.0, "estimated {freq} Hz");
    }

    #[test]
    fn clipped_input_is_still_estimated_with_a_capped_level() {
        let config = AnalyzerConfig::default();
        let samples = sine(330.0, config.sample_rate, 4 * config.fft_size, 1.4);
        let result = estimate_signal(&samples, &config);
        let freq = result.frequency.expect("a pitch");
        assert!((freq - 330.0).abs() < 0.5, "estimated {freq} Hz");
        assert_eq!(result.level, 1.0);
    }

    #[test]
    fn quiet_noise_stays_below_the_floor() {
        let config = AnalyzerConfig::default();
        // A deterministic low-level wobble far below the noise floor.
        let samples: Vec<f32> = (0..4 * config.fft_size)
            .map(|i| 1e-5 * ((i % 17) as f32 - 8.0))
            .collect();
        let result = estimate_signal(&samples, &config);
        assert_eq!(result.frequency, None);
    }

    #[test]
    fn identical_frames_estimate_identically() {
        let config = AnalyzerConfig::default();
        let samples = sine(523.25, config.sample_rate, 4 * config.fft_size, 0.5);
        let a = estimate_signal(&samples, &config);
        let b = estimate_signal(&samples, &config);
        assert_eq!(a.frequency, b.frequency);
        assert_eq!(a.level, b.level);
    }
}
