//! # Audio Capture Module
//!
//! This module handles real-time audio capture using CPAL (Cross-Platform Audio Library).
//! It opens the default or a named input device, selects a suitable
//! stream configuration, and delivers fixed-size mono frames to the
//! analysis thread over a channel.
//!
//! ## Features
//! - Default or named input device selection
//! - f32 capture with a signed 16-bit fallback for devices without it
//! - Downmixing for multi-channel devices
//! - Fixed-size frame delivery with drop-on-full backpressure
//! - Fatal errors only at stream construction, never mid-capture

use anyhow::{Result, anyhow};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;
use log::{debug, info, warn};

use crate::config::AnalyzerConfig;

/// Accumulates downmixed mono samples and ships complete frames.
struct FrameChunker {
    sender: Sender<Vec<f32>>,
    channels: usize,
    chunk: usize,
    mono: Vec<f32>,
}

impl FrameChunker {
    fn new(sender: Sender<Vec<f32>>, channels: usize, chunk: usize) -> Self {
        Self {
            sender,
            channels,
            chunk,
            mono: Vec::with_capacity(chunk * 2),
        }
    }

    /// Downmixes one callback's interleaved data and ships every
    /// complete frame. A full channel means the analysis thread is
    /// behind; the frame is dropped rather than blocking the audio
    /// callback.
    fn push(&mut self, data: &[f32]) {
        if self.channels == 1 {
            self.mono.extend_from_slice(data);
        } else {
            for frame in data.chunks_exact(self.channels) {
                self.mono.push(frame.iter().sum::<f32>() / self.channels as f32);
            }
        }
        while self.mono.len() >= self.chunk {
            let frame = self.mono[..self.chunk].to_vec();
            if self.sender.try_send(frame).is_err() {
                debug!("Analysis channel full, dropping a capture frame");
            }
            self.mono.drain(..self.chunk);
        }
    }
}

/// Starts audio capture on the default or a named input device.
///
/// The returned stream is already playing; dropping it releases the
/// device. The second element is the actual sample rate granted by the
/// device, which may differ from the requested one when the hardware
/// cannot provide it.
///
/// Failure to find or open a device is fatal and reported here.
/// Anything that goes wrong after the stream is up (an error callback,
/// a full channel) is logged and the next callback simply retries.
pub fn start_capture(
    sender: Sender<Vec<f32>>,
    device_name: Option<&str>,
    config: &AnalyzerConfig,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .input_devices()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow!("Input device {name:?} not found"))?,
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device available"))?,
    };
    info!("Using audio input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported = pick_format(&configs, cpal::SampleFormat::F32, config.sample_rate)
        .or_else(|| pick_format(&configs, cpal::SampleFormat::I16, config.sample_rate))
        .ok_or_else(|| anyhow!("No suitable f32 or i16 input format found"))?;

    let channels = supported.channels() as usize;
    let sample_format = supported.sample_format();
    let rate = config
        .sample_rate
        .clamp(supported.min_sample_rate().0, supported.max_sample_rate().0);
    let stream_config: cpal::StreamConfig =
        supported.with_sample_rate(cpal::SampleRate(rate)).into();
    info!("Selected {sample_format:?} input at {rate} Hz, {channels} channel(s)");

    let err_fn = |err| warn!("An error occurred on the audio stream: {err}");
    let mut chunker = FrameChunker::new(sender, channels, config.chunk_size);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| chunker.push(data),
            err_fn,
            None,
        )?,
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let converted: Vec<f32> =
                    data.iter().map(|&s| f32::from(s) / 32_768.0).collect();
                chunker.push(&converted);
            },
            err_fn,
            None,
        )?,
        other => return Err(anyhow!("Unsupported sample format {other:?}")),
    };

    stream.play()?;

    Ok((stream, rate))
}

/// Finds the best supported input configuration with the given sample
/// format, preferring mono at the closest rate; mono needs no
/// downmixing.
fn pick_format(
    configs: &[SupportedStreamConfigRange],
    format: cpal::SampleFormat,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    let rate_distance = |c: &SupportedStreamConfigRange| {
        let min_diff = (c.min_sample_rate().0 as i64 - target_rate as i64).abs();
        let max_diff = (c.max_sample_rate().0 as i64 - target_rate as i64).abs();
        min_diff.min(max_diff)
    };
    configs
        .iter()
        .filter(|c| c.sample_format() == format && c.channels() == 1)
        .min_by_key(|c| rate_distance(c))
        .or_else(|| {
            configs
                .iter()
                .filter(|c| c.sample_format() == format)
                .min_by_key(|c| rate_distance(c))
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn chunker_ships_fixed_size_frames() {
        let (tx, rx) = bounded(8);
        let mut chunker = FrameChunker::new(tx, 1, 4);
        chunker.push(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        assert_eq!(rx.try_recv().unwrap(), vec![0.1, 0.2, 0.3, 0.4]);
        assert!(rx.try_recv().is_err());
        chunker.push(&[0.7, 0.8]);
        assert_eq!(rx.try_recv().unwrap(), vec![0.5, 0.6, 0.7, 0.8]);
    }

    #[test]
    fn chunker_downmixes_interleaved_stereo() {
        let (tx, rx) = bounded(8);
        let mut chunker = FrameChunker::new(tx, 2, 2);
        chunker.push(&[0.25, 0.75, -1.0, 1.0]);
        assert_eq!(rx.try_recv().unwrap(), vec![0.5, 0.0]);
    }

    #[test]
    fn chunker_drops_frames_when_the_channel_is_full() {
        let (tx, rx) = bounded(1);
        let mut chunker = FrameChunker::new(tx, 1, 2);
        chunker.push(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        // Only the first frame fits; the rest were dropped, not queued.
        assert_eq!(rx.try_recv().unwrap(), vec![0.1, 0.2]);
        assert!(rx.try_recv().is_err());
    }
}
