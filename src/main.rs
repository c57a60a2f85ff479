// SPDX-License-Identifier: MIT
#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]

mod broker;
mod codec;
mod config;
mod device;
mod display;
mod error;
mod fleet;
mod producer;
mod recording;
mod session;
#[cfg(test)]
mod testing;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use crate::broker::MemoryBroker;
use crate::codec::Frame;
use crate::config::{DEFAULT_DISPLAY_DEPTH, DeviceProfile, FleetConfig};
use crate::device::emulator::EmulatorConnector;
use crate::display::{DisplaySink, LogSink};
use crate::error::StreamError;
use crate::fleet::{FleetController, SessionState};
use crate::recording::FileStore;
use crate::recording::reader::{RecordingReader, ReplaySource};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "radar-relay", about = "radar-relay: radar frame streaming and recording")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream and record one session per device until interrupted
    Stream {
        /// Device identifier (also the channel name); repeat for more devices
        #[arg(short, long = "device", required = true)]
        devices: Vec<String>,
        /// JSON device profile; omitted fields use the defaults
        #[arg(short, long)]
        profile: Option<PathBuf>,
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
        /// Stop after this many seconds (0 runs until interrupted)
        #[arg(long, default_value = "0")]
        duration: u64,
        #[arg(long, default_value_t = DEFAULT_DISPLAY_DEPTH)]
        display_depth: usize,
    },
    /// Replay a recorded session to the display
    Replay {
        path: PathBuf,
        #[arg(short, long, default_value = "1.0")]
        speed: f64,
    },
    /// Export a recording to CSV
    Export {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print a recording's header and frame count
    Info { path: PathBuf },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Stream {
            devices,
            profile,
            output_dir,
            duration,
            display_depth,
        } => {
            let mut config = FleetConfig::new(devices, output_dir);
            config.display_depth = display_depth;
            if let Some(path) = profile {
                config.profile = DeviceProfile::load(&path)?;
            }
            cmd_stream(config, duration)
        }
        Commands::Replay { path, speed } => cmd_replay(&path, speed),
        Commands::Export { input, output } => cmd_export(&input, &output),
        Commands::Info { path } => cmd_info(&path),
    }
}

// ---------------------------------------------------------------------------
// Signal handling
// ---------------------------------------------------------------------------

fn install_signal_handler() -> Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))
        .context("failed to register SIGINT handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))
        .context("failed to register SIGTERM handler")?;
    Ok(shutdown)
}

// ---------------------------------------------------------------------------
// Stream subcommand
// ---------------------------------------------------------------------------

fn cmd_stream(config: FleetConfig, duration_secs: u64) -> Result<()> {
    let shutdown = install_signal_handler()?;
    let store = FileStore::new(&config.output_dir)?;
    let output_dir = config.output_dir.clone();

    let broker = MemoryBroker::new();

    let mut fleet = FleetController::new(
        config,
        Arc::new(broker.clone()),
        Arc::new(EmulatorConnector),
        Arc::new(store),
        Arc::new(LogSink),
    )?;

    info!(
        "devices: {}",
        fleet.devices().collect::<Vec<_>>().join(", ")
    );
    let started = fleet.start_all();
    if started.values().all(Result::is_err) {
        bail!("no device could be started");
    }
    let failed: Vec<&str> = started
        .values()
        .filter_map(|r| r.as_ref().err())
        .map(StreamError::device)
        .collect();
    if !failed.is_empty() {
        warn!("continuing without {}", failed.join(", "));
    }
    info!(
        "streaming {} device(s), recordings go to {}",
        started.values().filter(|r| r.is_ok()).count(),
        output_dir.display()
    );

    let max_duration = (duration_secs > 0).then(|| Duration::from_secs(duration_secs));
    let start = Instant::now();
    let mut last_status = Instant::now();

    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("interrupted");
            break;
        }
        if let Some(max) = max_duration
            && start.elapsed() >= max
        {
            info!("duration limit reached");
            break;
        }

        std::thread::sleep(POLL_INTERVAL);

        if last_status.elapsed() >= STATUS_INTERVAL {
            print_fleet_status(&fleet, &broker, start.elapsed());
            last_status = Instant::now();
        }
    }

    let mut failures = 0;
    for (device, report) in fleet.stop_all() {
        if let Err(e) = &report.producer {
            warn!("{device}: producer ended with: {e}");
        }
        match &report.session {
            Ok(session) => {
                if let Some(e) = &session.drain_error {
                    warn!("{device}: consumer ended early: {e}");
                }
                eprintln!(
                    "{device}: {} frames saved to {} ({} rejected, {} not displayed)",
                    session.frames_saved, session.saved, session.rejected, session.display_dropped
                );
            }
            Err(e) => {
                error!("{e}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{failures} recording(s) could not be saved");
    }
    Ok(())
}

fn print_fleet_status(fleet: &FleetController, broker: &MemoryBroker, elapsed: Duration) {
    let secs = elapsed.as_secs();
    for (device, state) in fleet.states() {
        match state {
            SessionState::Running | SessionState::Failed => eprintln!(
                "  [{secs}s] {device}: {state:?}, {} published, {} recorded, {} queued",
                fleet.frames_published(&device).unwrap_or(0),
                fleet.frames_recorded(&device).unwrap_or(0),
                broker.queue_depth(&device)
            ),
            SessionState::NotStarted | SessionState::Stopped => {
                eprintln!("  [{secs}s] {device}: {state:?}");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Replay subcommand
// ---------------------------------------------------------------------------

fn cmd_replay(path: &Path, speed: f64) -> Result<()> {
    let shutdown = install_signal_handler()?;
    let reader = RecordingReader::open(path)?;
    let total = reader.frame_count();
    let mut source = ReplaySource::new(reader, speed);
    let device = source.metadata().device_id.clone();
    let sink = LogSink;

    info!("replaying {total} frames of {device} at {speed}x");

    let mut shown = 0;
    while !source.is_finished() {
        if shutdown.load(Ordering::Relaxed) {
            info!("interrupted");
            break;
        }
        if let Some(frame) = source.next_frame() {
            sink.show(&device, &frame);
            shown += 1;
        } else {
            std::thread::sleep(source.next_gap().min(POLL_INTERVAL));
        }
    }

    eprintln!("Replayed {shown}/{total} frames");
    Ok(())
}

// ---------------------------------------------------------------------------
// Info subcommand
// ---------------------------------------------------------------------------

fn cmd_info(path: &Path) -> Result<()> {
    let reader = RecordingReader::open(path)?;
    let meta = reader.metadata();
    let frames = reader.frames();

    println!("device:        {}", meta.device_id);
    println!(
        "session start: {}",
        chrono::DateTime::<chrono::Local>::from(meta.session_start).format("%Y-%m-%d %H:%M:%S")
    );
    println!("frames:        {}", frames.len());
    println!("sample count:  {}", meta.profile.sample_count);
    println!("fps:           {}", meta.profile.fps);
    if let (Some(first), Some(last)) = (frames.first(), frames.last()) {
        println!("span:          {:.3} s", last.timestamp - first.timestamp);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Export subcommand
// ---------------------------------------------------------------------------

fn cmd_export(input: &Path, output: &Path) -> Result<()> {
    let reader = RecordingReader::open(input)?;
    let total = reader.frame_count();

    let mut out = std::io::BufWriter::new(
        std::fs::File::create(output)
            .with_context(|| format!("failed to create {}", output.display()))?,
    );

    write_csv_header(&mut out, reader.metadata().profile.sample_count)?;
    for (i, frame) in reader.frames().iter().enumerate() {
        write_csv_row(&mut out, i, frame)?;
    }
    out.flush().context("failed to flush CSV")?;

    eprintln!(
        "Exported {total} frames from {} to {}",
        input.display(),
        output.display()
    );
    Ok(())
}

fn write_csv_header(out: &mut impl Write, sample_count: usize) -> Result<()> {
    write!(out, "frame,timestamp").context("failed to write CSV header")?;
    for bin in 0..sample_count {
        write!(out, ",bin_{bin}").context("failed to write CSV header")?;
    }
    writeln!(out).context("failed to write CSV header")
}

fn write_csv_row(out: &mut impl Write, index: usize, frame: &Frame) -> Result<()> {
    write!(out, "{index},{:.6}", frame.timestamp).context("failed to write CSV row")?;
    for sample in &frame.samples {
        write!(out, ",{sample}").context("failed to write CSV row")?;
    }
    writeln!(out).context("failed to write CSV row")
}
