//! livescope - headless streaming host
//!
//! Runs one streaming session against the configured transport and draws a
//! one-line summary of every rendered frame in the terminal.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use livescope::{
    config::{default_config_path, PipelineConfig, TransportConfig},
    logging::init_logging,
    transport::{SimulatedConfig, TcpConfig},
    Frame, StatusSnapshot, StreamSession,
};
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(
    name = "livescope",
    version,
    about = "Stream numeric samples into a bounded buffer and render them at a capped frame rate"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a streaming session
    Run(RunArgs),
    /// Write the default configuration as TOML
    InitConfig(InitConfigArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds (runs until interrupted otherwise)
    #[arg(long)]
    duration: Option<f64>,

    /// Use the simulated waveform transport
    #[arg(long, conflicts_with = "address")]
    simulate: bool,

    /// Connect to a TCP producer at HOST:PORT
    #[arg(long)]
    address: Option<String>,

    /// Print the final status as JSON
    #[arg(long)]
    status_json: bool,
}

#[derive(Args)]
struct InitConfigArgs {
    /// Where to write the file (defaults to the platform config directory)
    path: Option<PathBuf>,

    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args),
        Command::InitConfig(args) => init_config(args),
    }
}

fn load_config(args: &RunArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => default_config_path()
            .map(PipelineConfig::load_or_default)
            .unwrap_or_default(),
    };

    if args.simulate && !matches!(config.transport, TransportConfig::Simulated(_)) {
        config.transport = TransportConfig::Simulated(SimulatedConfig::default());
    }
    if let Some(address) = &args.address {
        let tcp = match config.transport {
            TransportConfig::Tcp(tcp) => TcpConfig {
                address: address.clone(),
                ..tcp
            },
            TransportConfig::Simulated(_) => TcpConfig {
                address: address.clone(),
                ..Default::default()
            },
        };
        config.transport = TransportConfig::Tcp(tcp);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// One status line per frame, rewritten in place
fn draw_frame(frame: &Frame) -> livescope::Result<()> {
    let window = frame.window();
    let mut out = std::io::stdout().lock();

    match (window.last(), window.value_range()) {
        (Some(last), Some((min, max))) => write!(
            out,
            "\r{:<14} frame {:>7} | {:>6} samples | last {:>10.4} | range [{:.4}, {:.4}]   ",
            frame.state().label(),
            frame.index(),
            window.len(),
            last.value(),
            min,
            max
        )?,
        _ => write!(
            out,
            "\r{:<14} frame {:>7} | no samples{:<48}",
            frame.state().label(),
            frame.index(),
            ""
        )?,
    }
    out.flush()?;
    Ok(())
}

fn print_status(status: &StatusSnapshot) {
    println!("state:        {}", status.state);
    println!(
        "buffer:       {}/{} ({:.1}%)",
        status.buffer.len,
        status.buffer.capacity,
        status.buffer_fill_percent()
    );
    println!("sample rate:  {:.1}/s", status.sample_rate);
    println!("frame rate:   {:.1}/s", status.frame_rate);
    println!(
        "ingest:       {} samples in {} batches, {} rejected, {} gaps ({} missing)",
        status.ingest.accepted_samples,
        status.ingest.accepted_batches,
        status.ingest.rejected_batches,
        status.ingest.gap_count,
        status.ingest.missing_samples
    );
    println!(
        "render:       {} frames, {} dropped ({:.1}%), {} failed, avg {:.0} us",
        status.render.frames_rendered,
        status.render.frames_dropped,
        status.render.drop_rate() * 100.0,
        status.render.frames_failed,
        status.render.avg_render_time_us
    );
}

/// Parse `--duration` into a run limit; `None` runs until interrupted
fn run_duration(secs: Option<f64>) -> anyhow::Result<Option<Duration>> {
    secs.map(|secs| {
        Duration::try_from_secs_f64(secs).with_context(|| {
            format!(
                "Invalid --duration {}: expected a finite, non-negative number of seconds",
                secs
            )
        })
    })
    .transpose()
}

fn run(args: RunArgs) -> anyhow::Result<()> {
    let run_for = run_duration(args.duration)?;
    let config = load_config(&args)?;
    let _log_guard = init_logging(&config.logging)?;

    let mut session = StreamSession::builder(config)
        .renderer(Box::new(draw_frame))
        .build()
        .context("Failed to create session")?;

    tracing::info!("Starting session on {}", session.transport_description());
    session.start()?;

    let deadline = run_for.map(|limit| Instant::now() + limit);
    let mut failure = None;

    while deadline.map_or(true, |d| Instant::now() < d) {
        std::thread::sleep(Duration::from_millis(100));

        let reconnect = session.reconnect_status();
        if reconnect.terminal {
            failure = Some(format!(
                "{} (gave up after {} reconnect attempts)",
                session.connection_state(),
                reconnect.attempts
            ));
            break;
        }
    }

    let status = session.status();
    session.stop()?;
    println!();

    if args.status_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }

    if let Some(reason) = failure {
        bail!(reason);
    }
    Ok(())
}

fn init_config(args: InitConfigArgs) -> anyhow::Result<()> {
    let path = match args.path.or_else(default_config_path) {
        Some(path) => path,
        None => bail!("No platform config directory; pass a path explicitly"),
    };

    if path.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    PipelineConfig::default().save(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
