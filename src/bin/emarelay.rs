//! emarelay command line
//!
//! - `emarelay emulate <file>` serves a recorded motion file as if it were a live device.
//! - `emarelay relay` connects to an upstream and serves consumers.
//! - `emarelay monitor` streams from an upstream and prints smoothed frames.
//!
//! Settings come from `--config <file.yaml>` when given, flags override them. Logging is
//! controlled with `RUST_LOG` (default `emarelay=info`).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use emarelay::DataFrame;
use emarelay::config::{CalibrationSource, Settings};
use emarelay::emulator::EmulatorHandle;
use emarelay::reader::{ReaderOptions, StreamReader};
use emarelay::relay::RelayHandle;
use emarelay::stream::SmoothedExt;

/// Real-time articulography relay
#[derive(Parser)]
#[command(name = "emarelay")]
#[command(about = "Relay, emulate and monitor articulography streams", long_about = None)]
#[command(version)]
struct Cli {
    /// YAML settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a motion file (.tsv, .bvh, .pos, .json) as a live source
    Emulate {
        /// Motion file to serve
        #[arg(name = "FILE")]
        file: PathBuf,

        /// Restart at the end of the file (true/false)
        #[arg(long = "loop", value_name = "BOOL")]
        looping: Option<bool>,

        /// Address to listen on
        #[arg(long)]
        listen: Option<String>,
    },

    /// Relay an upstream source to consumers
    Relay {
        /// Address consumers connect to
        #[arg(long)]
        listen: Option<String>,

        /// Upstream device or emulator address
        #[arg(long)]
        upstream: Option<String>,

        /// Enable head correction with this sensor roles JSON file
        #[arg(long, value_name = "ROLES")]
        head_correction: Option<PathBuf>,

        /// Start-up calibration: a saved .yaml calibration or a recorded .tsv window
        #[arg(long, requires = "head_correction")]
        calibration: Option<PathBuf>,
    },

    /// Stream from an upstream and print smoothed frames
    Monitor {
        /// Upstream device or emulator address
        #[arg(long)]
        upstream: Option<String>,

        /// Frames averaged per printed frame
        #[arg(long, default_value_t = 1)]
        smooth: usize,

        /// Stop after this many frames
        #[arg(long)]
        frames: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("emarelay=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };

    match cli.command {
        Commands::Emulate { file, looping, listen } => {
            if let Some(looping) = looping {
                settings.emulator.looping = looping;
            }
            if let Some(listen) = listen {
                settings.emulator.listen = listen;
            }
            emulate(file, &settings).await
        }
        Commands::Relay { listen, upstream, head_correction, calibration } => {
            if let Some(listen) = listen {
                settings.relay.listen = listen;
            }
            if let Some(upstream) = upstream {
                settings.relay.upstream = upstream;
            }
            if let Some(roles) = head_correction {
                settings.relay.head_correction.enabled = true;
                settings.relay.head_correction.roles = Some(roles);
            }
            if let Some(path) = calibration {
                let is_tsv = path.extension().is_some_and(|e| e.eq_ignore_ascii_case("tsv"));
                settings.relay.head_correction.calibration = if is_tsv {
                    CalibrationSource::Tsv { path }
                } else {
                    CalibrationSource::Saved { path }
                };
            }
            relay(&settings).await
        }
        Commands::Monitor { upstream, smooth, frames } => {
            if let Some(upstream) = upstream {
                settings.relay.upstream = upstream;
            }
            monitor(&settings, smooth, frames).await
        }
    }
}

async fn emulate(file: PathBuf, settings: &Settings) -> Result<()> {
    let emulator = EmulatorHandle::start(&file, &settings.emulator)
        .await
        .with_context(|| format!("starting emulator for {}", file.display()))?;
    info!("markers: {}", emulator.marker_names().join(", "));

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("waiting for Ctrl-C")?,
        _ = emulator.closed() => {}
    }
    emulator.shutdown().await;
    Ok(())
}

async fn relay(settings: &Settings) -> Result<()> {
    let relay = RelayHandle::start(&settings.relay, &settings.emulator.parser)
        .await
        .context("starting relay")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("waiting for Ctrl-C")?,
        _ = relay.closed() => info!("relay asked to stop"),
    }
    relay.shutdown().await;
    Ok(())
}

async fn monitor(settings: &Settings, smooth: usize, limit: Option<usize>) -> Result<()> {
    let upstream = settings.relay.upstream_addr()?;
    let reader = StreamReader::connect(upstream, ReaderOptions::from(&settings.relay))
        .await
        .with_context(|| format!("connecting to {upstream}"))?;

    let parameters = reader.parameters().await.context("reading upstream parameters")?;
    println!("{parameters}");

    let mut frames = reader.frames().smoothed(smooth.max(1));
    reader.start_streaming(Some(f64::from(settings.relay.stream_frequency))).await?;

    let mut shown = 0usize;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for Ctrl-C")?;
                break;
            }
            next = frames.next() => match next {
                Some(frame) => {
                    println!("{}", format_frame(&frame));
                    shown += 1;
                    if limit.is_some_and(|limit| shown >= limit) {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    if reader.is_connected() {
        reader.stop_streaming().await?;
    }
    reader.close().await;
    info!(frames = shown, "monitor finished");
    Ok(())
}

fn format_frame(frame: &DataFrame) -> String {
    let mut line = frame.timestamp_micros().unwrap_or(0).to_string();
    for coil in frame.coils() {
        let p = coil.location;
        line.push_str(&format!("\t{:.3} {:.3} {:.3}", p.x, p.y, p.z));
    }
    line
}
