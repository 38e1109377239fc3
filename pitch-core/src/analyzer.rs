//! # Spectral Analysis Module
//!
//! Converts fixed-size windows of time-domain samples into a frequency
//! domain representation suitable for pitch extraction.
//!
//! ## Features
//! - High-performance FFT using RustFFT with a session-lifetime plan
//! - Hann windowing for reduced spectral leakage
//! - DC offset removal for accurate low-bin analysis
//! - Phase-vocoder frequency correction for sub-bin accuracy
//!
//! The naive mapping from bin index to frequency has a resolution of
//! `sample_rate / fft_size` (over 20 Hz at the default settings), far
//! too coarse for singing. The analyzer therefore compares each bin's
//! phase against the phase it held one step earlier, and converts the
//! deviation from the expected phase advance into a frequency offset
//! from the bin center. The previous-phase array persists across
//! windows, which makes the analyzer stateful and single-owner.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

use log::warn;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::config::AnalyzerConfig;

/// One analyzed window in the frequency domain.
#[derive(Debug, Clone)]
pub struct SpectralFrame {
    /// Normalized magnitude per bin (complex modulus scaled by
    /// `1 / fft_size`), `fft_size / 2 + 1` entries.
    pub magnitudes: Vec<f32>,
    /// Phase-corrected frequency per bin in Hz.
    pub frequencies: Vec<f32>,
    /// Peak absolute sample level of the window, capped at 1.0.
    pub peak_level: f32,
}

/// Streaming spectral analyzer.
///
/// Holds all session-lifetime state: the precomputed window function,
/// the FFT plan and the previous phase of every bin. An instance must
/// be driven from a single thread; the phase state is mutated in place
/// on every analyzed window.
pub struct Analyzer {
    fft_size: usize,
    step: usize,
    sample_rate: u32,
    fft: Arc<dyn Fft<f32>>,
    /// Precomputed Hann window coefficients.
    window: Vec<f32>,
    /// Working sample buffer; the oldest samples are discarded when it
    /// would grow past [`Analyzer::max_buffered`] samples.
    buf: VecDeque<f32>,
    /// Snapshot of the window currently being analyzed.
    window_buf: Vec<f32>,
    /// Phase of each bin in the previously analyzed window.
    last_phase: Vec<f32>,
    /// Scratch buffer for the in-place transform.
    fft_buf: Vec<Complex<f32>>,
    frame: SpectralFrame,
}

impl Analyzer {
    /// Creates an analyzer for the given (already validated) configuration.
    pub fn new(config: &AnalyzerConfig) -> Self {
        let n = config.fft_size;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n);

        // Hann window
        let window = (0..n)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (n - 1) as f32).cos()))
            .collect();

        let bins = n / 2 + 1;
        Self {
            fft_size: n,
            step: config.step,
            sample_rate: config.sample_rate,
            fft,
            window,
            buf: VecDeque::with_capacity(4 * n),
            window_buf: Vec::with_capacity(n),
            last_phase: vec![0.0; bins],
            fft_buf: vec![Complex::new(0.0, 0.0); n],
            frame: SpectralFrame {
                magnitudes: vec![0.0; bins],
                frequencies: vec![0.0; bins],
                peak_level: 0.0,
            },
        }
    }

    /// Largest number of samples kept waiting for analysis.
    fn max_buffered(&self) -> usize {
        4 * self.fft_size
    }

    /// Appends captured samples to the working buffer.
    ///
    /// When the consumer falls behind, the oldest samples are dropped
    /// so memory use stays bounded, matching the overwrite semantics of
    /// a capture ring.
    pub fn input(&mut self, samples: &[f32]) {
        self.buf.extend(samples.iter().copied());
        let cap = self.max_buffered();
        if self.buf.len() > cap {
            let excess = self.buf.len() - cap;
            self.buf.drain(..excess);
            warn!("analysis buffer overrun, dropped {excess} samples");
        }
    }

    /// Analyzes exactly one window of samples.
    ///
    /// Calls with fewer than `fft_size` samples are silently ignored.
    /// Extra samples beyond the window size are not consumed.
    pub fn compute(&mut self, samples: &[f32]) -> Option<&SpectralFrame> {
        if samples.len() < self.fft_size {
            return None;
        }
        self.window_buf.clear();
        self.window_buf.extend_from_slice(&samples[..self.fft_size]);
        self.analyze_window();
        Some(&self.frame)
    }

    /// Analyzes every full window currently in the working buffer,
    /// advancing by `step` samples between windows, and returns the
    /// most recent spectral frame. `None` when no full window was
    /// available.
    pub fn process(&mut self) -> Option<&SpectralFrame> {
        let mut analyzed = false;
        while self.buf.len() >= self.fft_size {
            self.window_buf.clear();
            self.window_buf
                .extend(self.buf.iter().take(self.fft_size).copied());
            self.analyze_window();
            self.buf.drain(..self.step);
            analyzed = true;
        }
        if analyzed { Some(&self.frame) } else { None }
    }

    /// Number of buffered samples not yet consumed by a full window.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Windows, transforms and phase-corrects the snapshot in
    /// `window_buf`, leaving the result in `frame`.
    fn analyze_window(&mut self) {
        debug_assert_eq!(self.window_buf.len(), self.fft_size);

        let mut peak = 0.0_f32;
        for &s in &self.window_buf {
            peak = peak.max(s.abs());
        }
        self.frame.peak_level = peak.min(1.0);

        remove_dc_offset(&mut self.window_buf);
        for (slot, (&s, &w)) in self
            .fft_buf
            .iter_mut()
            .zip(self.window_buf.iter().zip(&self.window))
        {
            *slot = Complex::new(s * w, 0.0);
        }
        self.fft.process(&mut self.fft_buf);
        self.measure();
    }

    /// Phase-vocoder step: refines each bin's frequency from the phase
    /// advance since the window `step` samples earlier.
    fn measure(&mut self) {
        let freq_per_bin = self.sample_rate as f32 / self.fft_size as f32;
        // Expected phase advance of a bin-center frequency over one step.
        let phase_step = 2.0 * PI * self.step as f32 / self.fft_size as f32;
        let norm = 1.0 / self.fft_size as f32;

        for k in 0..self.frame.magnitudes.len() {
            let c = self.fft_buf[k];
            self.frame.magnitudes[k] = c.norm() * norm;

            let phase = c.arg();
            let mut delta = phase - self.last_phase[k];
            self.last_phase[k] = phase;
            // Subtract the expected advance and map the remainder into
            // the +/- PI branch before converting it to a bin offset.
            delta -= k as f32 * phase_step;
            delta = wrap_phase(delta);
            let deviation = delta / phase_step;
            self.frame.frequencies[k] = (k as f32 + deviation) * freq_per_bin;
        }
    }
}

/// Wraps a phase difference into the +/- PI branch.
fn wrap_phase(phase: f32) -> f32 {
    (phase + PI).rem_euclid(2.0 * PI) - PI
}

/// Removes the DC offset from a signal by making its average value zero.
///
/// A DC component leaks into the lowest bins and distorts their phase,
/// which the frequency correction is sensitive to.
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}
