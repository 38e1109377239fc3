//! # Session Recorder Module
//!
//! Owns the capture stream and the analysis worker for one singing
//! session, and exposes the polling surface that the pitch graph and
//! scoring screens read once per tick.
//!
//! ## Architecture
//! - **Capture callback**: CPAL-owned thread, downmixes and frames raw
//!   input (see [`crate::audio`])
//! - **Worker thread**: sole owner of the analyzer's mutable state,
//!   drains the frame channel and publishes estimates
//! - **Snapshot**: mutex-guarded [`PitchEstimate`], so a consumer never
//!   observes a half-updated estimate
//!
//! The session is an explicit object: create it, pass it by reference
//! to whatever consumes it, drop it to release the device.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use anyhow::{Result, anyhow};
use cpal::traits::StreamTrait;
use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, info, warn};

use crate::PitchEstimate;
use crate::analyzer::Analyzer;
use crate::audio;
use crate::config::AnalyzerConfig;
use crate::pitch;
use crate::scale::MusicalScale;

/// Capacity of the capture-to-analysis channel, roughly three quarters
/// of a second of audio at the default chunk size.
const FRAME_CHANNEL_CAPACITY: usize = 32;

/// A running capture-and-analysis session.
#[derive(Debug)]
pub struct Recorder {
    shutdown_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
    snapshot: Arc<Mutex<PitchEstimate>>,
    scale: MusicalScale,
}

impl Recorder {
    /// Starts a session on the default or a named input device.
    ///
    /// Fails fast: an invalid configuration or an unopenable device is
    /// reported here and no session starts. Transient capture problems
    /// after this point are logged and retried, never surfaced.
    pub fn start(config: AnalyzerConfig, device: Option<String>) -> Result<Self> {
        config.validate()?;
        let scale = MusicalScale::new(config.base_freq);
        let snapshot = Arc::new(Mutex::new(PitchEstimate::default()));

        let (shutdown_tx, shutdown_rx) = bounded(1);
        let (startup_tx, startup_rx) = bounded(1);

        let worker_snapshot = Arc::clone(&snapshot);
        let worker_scale = scale.clone();
        let handle = thread::spawn(move || {
            run_worker(
                config,
                device,
                worker_snapshot,
                worker_scale,
                startup_tx,
                shutdown_rx,
            )
        });

        // The stream must live on the worker thread, so wait for it to
        // report whether the device opened.
        match startup_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(anyhow!("Analysis worker exited before startup"));
            }
        }

        Ok(Self {
            shutdown_tx,
            handle: Some(handle),
            snapshot,
            scale,
        })
    }

    /// Latest detected frequency in Hz; 0.0 while no pitch is detected.
    /// Never blocks on the worker.
    pub fn freq(&self) -> f32 {
        lock_snapshot(&self.snapshot).frequency.unwrap_or(0.0)
    }

    /// Note id of the latest estimate.
    pub fn note_id(&self) -> Option<i32> {
        lock_snapshot(&self.snapshot).note_id
    }

    /// Frequency of an arbitrary note id on this session's scale.
    pub fn note_freq(&self, id: i32) -> f32 {
        self.scale.note_freq(id)
    }

    /// Display name of an arbitrary note id.
    pub fn note_str(&self, id: i32) -> String {
        self.scale.note_str(id)
    }

    /// Full copy of the latest estimate.
    pub fn latest(&self) -> PitchEstimate {
        lock_snapshot(&self.snapshot).clone()
    }

    /// Stops the worker and releases the input device. A partial window
    /// still sitting in the analysis buffer is discarded.
    pub fn stop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Analysis worker panicked during shutdown");
            }
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Locks the estimate snapshot, recovering it if a previous holder
/// panicked; the estimate itself is always a consistent value.
fn lock_snapshot(snapshot: &Mutex<PitchEstimate>) -> MutexGuard<'_, PitchEstimate> {
    snapshot
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Body of the analysis worker thread.
///
/// Opens the capture stream (reporting the outcome through
/// `startup_tx`), then drains capture frames into the analyzer until
/// the channel closes or shutdown is requested.
fn run_worker(
    config: AnalyzerConfig,
    device: Option<String>,
    snapshot: Arc<Mutex<PitchEstimate>>,
    scale: MusicalScale,
    startup_tx: Sender<Result<()>>,
    shutdown_rx: Receiver<()>,
) {
    let (frame_tx, frame_rx) = bounded::<Vec<f32>>(FRAME_CHANNEL_CAPACITY);

    let (stream, rate) = match audio::start_capture(frame_tx, device.as_deref(), &config) {
        Ok(pair) => pair,
        Err(e) => {
            let _ = startup_tx.send(Err(e));
            return;
        }
    };

    let mut config = config;
    if rate != config.sample_rate {
        info!("Device runs at {rate} Hz, adjusting analysis accordingly");
        config.sample_rate = rate;
    }
    let mut analyzer = Analyzer::new(&config);
    let _ = startup_tx.send(Ok(()));
    info!("Analysis worker running");

    loop {
        crossbeam_channel::select! {
            recv(frame_rx) -> msg => match msg {
                Ok(frame) => {
                    analyzer.input(&frame);
                    if let Some(spectral) = analyzer.process() {
                        let mut estimate = pitch::estimate(spectral, &config);
                        if let Some(freq) = estimate.frequency {
                            estimate.note_id = scale.note_id(freq);
                            estimate.note_name = estimate.note_id.map(|id| scale.note_str(id));
                        }
                        *lock_snapshot(&snapshot) = estimate;
                    }
                }
                Err(_) => {
                    warn!("Capture channel closed, stopping analysis");
                    break;
                }
            },
            recv(shutdown_rx) -> _ => {
                debug!("Shutdown requested");
                break;
            }
        }
    }

    if let Err(e) = stream.pause() {
        warn!("Error pausing stream: {e}");
    }
    drop(stream);
    info!("Analysis worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    #[test]
    fn invalid_configuration_is_fatal_before_any_device_access() {
        let config = AnalyzerConfig {
            fft_size: 1000,
            ..AnalyzerConfig::default()
        };
        let err = Recorder::start(config, None).expect_err("must not start");
        assert!(err.downcast_ref::<ConfigError>().is_some(), "{err}");
    }

    #[test]
    fn scale_lookups_do_not_need_a_session() {
        // The lookups are pure; exercise them through the scale the
        // recorder would carry.
        let scale = MusicalScale::new(440.0);
        assert_eq!(scale.note_str(69), "A4");
        assert!((scale.note_freq(69) - 440.0).abs() < 1e-3);
    }
}
