//! bytewave CLI: real-time bytebeat and stream-graph player with a live-coding prompt.
//!
//! Lines typed on stdin replace the playing signal at the next buffer boundary:
//! an expression in `t` (`t*(t>>5|t>>8)`), `?` for a random expression, or `:name` for a
//! built-in patch.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytewave_engine::bytebeat::{generate, Expr, ParseError};
use bytewave_engine::realtime;
use bytewave_engine::visual::{peak, rms};
use bytewave_engine::{Patch, Scheduler, SchedulerConfig, Signal, SignalSlot, TimelineSink, VisualError};
use clap::Parser;
use cpal::traits::{DeviceTrait, StreamTrait};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const CLASSIC: &str = "t*(t>>5|t>>8)";

#[derive(Parser, Debug)]
#[command(name = "bytewave")]
#[command(about = "Gapless live-coded bytebeat player", long_about = None)]
struct Args {
    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Output device name (default: host default)
    #[arg(long)]
    device: Option<String>,

    /// Requested sample rate in Hz; the device may settle on a nearby rate
    #[arg(long, default_value_t = 48_000)]
    sample_rate: u32,

    /// Output channels (default: device default)
    #[arg(long)]
    channels: Option<u16>,

    /// Samples per buffer
    #[arg(long, default_value_t = 1600)]
    buffer: usize,

    /// Scheduling lead in seconds
    #[arg(long, default_value_t = 0.1)]
    lead: f64,

    /// Bytebeat expression to start with
    #[arg(long, group = "source")]
    expr: Option<String>,

    /// Built-in patch to start with (ramp, drone, siren, gate, pulse)
    #[arg(long, group = "source")]
    patch: Option<Patch>,

    /// Start with a random expression of this depth (also the depth used by `?`)
    #[arg(long, group = "source", value_parser = clap::value_parser!(u32).range(0..=MAX_RANDOM_DEPTH))]
    random: Option<u32>,

    /// Output gain 0.0-1.0
    #[arg(long, default_value_t = 0.35)]
    gain: f32,

    /// Stop after this many seconds (default: run until Ctrl+C)
    #[arg(long)]
    duration: Option<f64>,
}

const DEFAULT_RANDOM_DEPTH: u32 = 5;
// A depth-d tree has 2^(d+1) - 1 nodes.
const MAX_RANDOM_DEPTH: i64 = 16;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// What a line of live input asks for.
#[derive(Debug)]
enum Command {
    Random,
    Patch(Patch),
    Expr(Expr),
}

fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if line == "?" {
        return Ok(Some(Command::Random));
    }
    if let Some(name) = line.strip_prefix(':') {
        return Ok(Some(Command::Patch(name.parse()?)));
    }
    let expr = Expr::parse(line).map_err(|e| anyhow::anyhow!(describe(line, &e)))?;
    Ok(Some(Command::Expr(expr)))
}

/// Error message with a caret under the offending offset.
fn describe(src: &str, err: &ParseError) -> String {
    match err.offset() {
        Some(pos) => format!("{err}\n  {src}\n  {:>width$}", "^", width = pos + 1),
        None => err.to_string(),
    }
}

fn random_signal(depth: u32) -> (String, Signal) {
    let expr = generate(depth, &mut rand::thread_rng());
    (expr.to_string(), Signal::bytebeat(expr))
}

fn initial_signal(args: &Args, sample_rate: u32) -> Result<(String, Signal)> {
    if let Some(src) = &args.expr {
        let expr = Expr::parse(src).map_err(|e| anyhow::anyhow!(describe(src, &e)))?;
        return Ok((expr.to_string(), Signal::bytebeat(expr)));
    }
    if let Some(patch) = args.patch {
        return Ok((format!(":{patch}"), patch.signal(sample_rate)));
    }
    if let Some(depth) = args.random {
        return Ok(random_signal(depth));
    }
    let expr = Expr::parse(CLASSIC).context("built-in expression")?;
    Ok((CLASSIC.to_owned(), Signal::bytebeat(expr)))
}

/// Live-coding prompt: reads stdin until EOF, swapping the slot on every valid line.
fn spawn_prompt(slot: SignalSlot, sample_rate: u32, depth: u32) -> Result<thread::JoinHandle<()>> {
    let handle = thread::Builder::new().name("bytewave-prompt".into()).spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!(error = %e, "stdin closed");
                    break;
                }
            };
            match parse_command(&line) {
                Ok(None) => {}
                Ok(Some(Command::Random)) => {
                    let (text, signal) = random_signal(depth);
                    println!("{text}");
                    slot.swap(signal);
                }
                Ok(Some(Command::Patch(patch))) => {
                    println!(":{patch}");
                    slot.swap(patch.signal(sample_rate));
                }
                Ok(Some(Command::Expr(expr))) => {
                    debug!(%expr, nodes = expr.size(), "expression accepted");
                    slot.swap(Signal::bytebeat(expr));
                }
                Err(e) => eprintln!("{e}"),
            }
        }
        debug!("prompt finished");
    })?;
    Ok(handle)
}

/// One refilled buffer's levels.
#[derive(Copy, Clone, Debug, Default)]
struct Level {
    peak: f32,
    rms: f32,
}

impl Level {
    fn of(samples: &[f32]) -> Self {
        Self { peak: peak(samples), rms: rms(samples) }
    }
}

/// Level meter fed from the scheduler's visual side channel. Never blocks the audio thread:
/// when the meter thread falls behind, readings are dropped.
fn meter(buffers_per_report: usize) -> Result<SyncSender<Level>> {
    let (tx, rx): (SyncSender<Level>, Receiver<Level>) = mpsc::sync_channel(64);
    let every = buffers_per_report.max(1);
    thread::Builder::new().name("bytewave-meter".into()).spawn(move || {
        let mut held = Level::default();
        for (n, level) in rx.iter().enumerate() {
            held.peak = held.peak.max(level.peak);
            held.rms = held.rms.max(level.rms);
            if (n + 1) % every == 0 {
                debug!(peak = f64::from(held.peak), rms = f64::from(held.rms), "meter");
                held = Level::default();
            }
        }
    })?;
    Ok(tx)
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    if args.list_devices {
        println!("Available output devices:");
        for name in realtime::output_device_names()? {
            println!("- {name}");
        }
        return Ok(());
    }
    if !(args.gain.is_finite() && (0.0..=1.0).contains(&args.gain)) {
        bail!("--gain must be between 0.0 and 1.0, got {}", args.gain);
    }

    let device = realtime::pick_device(args.device.as_deref())?;
    let supported = realtime::choose_config(&device, Some(args.sample_rate), args.channels)?;
    let sample_rate = supported.sample_rate().0;
    if sample_rate != args.sample_rate {
        warn!(requested = args.sample_rate, actual = sample_rate, "device runs at a different rate");
    }

    let (label, signal) = initial_signal(&args, sample_rate)?;
    let slot = SignalSlot::new(signal);
    let config = SchedulerConfig { sample_rate, buffer_len: args.buffer, lead: args.lead };
    let sink = TimelineSink::with_capacity(sample_rate, args.buffer);

    let meter_tx = meter(sample_rate as usize / args.buffer.max(1))?;
    let visual = move |samples: &[f32]| -> Result<(), VisualError> {
        match meter_tx.try_send(Level::of(samples)) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(VisualError::Disconnected),
        }
    };
    let mut scheduler = Scheduler::new(sink, slot.clone(), config)
        .context("invalid scheduler settings")?
        .with_visual(visual);
    scheduler.start()?;

    let stream = realtime::build_output_stream(&device, &supported, scheduler, args.gain)?;

    info!(device = %device.name()?, sample_rate, buffer = args.buffer, lead = args.lead, "bytewave ready");
    println!("{label}");
    stream.play().context("starting output stream")?;

    let depth = args.random.unwrap_or(DEFAULT_RANDOM_DEPTH);
    let _prompt = spawn_prompt(slot.clone(), sample_rate, depth)?;

    if let Some(secs) = args.duration {
        thread::sleep(Duration::from_secs_f64(secs.max(0.0)));
        return Ok(());
    }

    loop {
        thread::sleep(Duration::from_millis(500));
        slot.collect_retired();
    }
}
