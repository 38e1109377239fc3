//! # Pitch Meter
//!
//! Console front end for the pitch analysis pipeline: starts a recorder
//! session and polls it on a fixed tick, printing the detected note the
//! way the game's pitch graph and scoring screens read it.
//!
//! ## Architecture
//! - **Main thread**: argument parsing and the poll-and-print loop
//! - **Audio**: capture and analysis run inside the recorder session
//! - **Shutdown**: dropping the recorder releases the input device

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use pitch_core::{AnalyzerConfig, Recorder};

#[derive(Debug, Parser)]
#[command(name = "pitch-meter", about = "Microphone pitch meter")]
struct Args {
    /// Input device name; the default input device is used when omitted.
    #[arg(long)]
    device: Option<String>,

    /// Capture sample rate in Hz, overriding the configuration file.
    #[arg(long)]
    rate: Option<u32>,

    /// Path to a JSON analyzer configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Poll period in milliseconds.
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    /// Stop after this many seconds; run until killed when omitted.
    #[arg(long)]
    duration: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Reading config {}", path.display()))?;
            serde_json::from_str::<AnalyzerConfig>(&text)
                .with_context(|| format!("Parsing config {}", path.display()))?
        }
        None => AnalyzerConfig::default(),
    };
    if let Some(rate) = args.rate {
        config.sample_rate = rate;
    }

    let recorder = Recorder::start(config, args.device.clone())?;
    log::info!("Session started, polling every {} ms", args.interval_ms);

    let tick = Duration::from_millis(args.interval_ms.max(1));
    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    loop {
        thread::sleep(tick);

        let estimate = recorder.latest();
        match (estimate.note_name.as_deref(), estimate.frequency) {
            (Some(name), Some(freq)) => {
                println!("{name:<4} {freq:8.1} Hz   level {:.2}", estimate.level);
            }
            _ => {
                println!("---           Hz   level {:.2}", estimate.level);
            }
        }

        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                break;
            }
        }
    }

    Ok(())
}
