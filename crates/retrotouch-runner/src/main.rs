//! RetroTouch runner - the emulation side of a RetroTouch session.
//!
//! Spawned by the UI's supervisor with two inherited pipe descriptors and the
//! path of the shared region in its environment. Loads the core and game,
//! then runs the engine loop until the supervisor closes the channel.

use anyhow::{Context, Result};
use clap::Parser;
use retrotouch_core::config::EnvVars;
use retrotouch_core::runner::engine::HEADLESS_FRAME_TIME;
use retrotouch_core::{platform, BackgroundColor, Channel, HeadlessEngine, RegionReader, Runner};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "retrotouch-runner")]
#[command(about = "Emulation process for RetroTouch; started by the UI, not by hand")]
struct Args {
    /// Emulator core to load
    core: PathBuf,

    /// Game to load into the core
    game: PathBuf,

    /// Descriptor to read requests from
    #[arg(long, env = EnvVars::READ_FD, default_value = "0")]
    read_fd: i32,

    /// Descriptor to write events to
    #[arg(long, env = EnvVars::WRITE_FD, default_value = "1")]
    write_fd: i32,

    /// UI surface to embed the render window into
    #[arg(long, env = EnvVars::WINDOW_ID, default_value = "0")]
    window_id: u64,

    /// Shared region backing file
    #[arg(long, env = EnvVars::SHM_FILENAME)]
    shm: PathBuf,

    /// Background color as "r g b" in 0..1
    #[arg(long, env = EnvVars::BACKGROUND_COLOR, default_value = "0")]
    background: BackgroundColor,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn init_logging(debug: bool) {
    // Stdout may be the event pipe; logs always go to stderr
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    debug!("Runner arguments: {:?}", args);

    let read = platform::adopt_fd(args.read_fd, EnvVars::READ_FD)?;
    let write = platform::adopt_fd(args.write_fd, EnvVars::WRITE_FD)?;
    let channel = Channel::new(read, write);

    let region = RegionReader::open(&args.shm)
        .with_context(|| format!("Failed to open shared region {}", args.shm.display()))?;

    let engine =
        HeadlessEngine::new(args.window_id, args.background).with_frame_time(HEADLESS_FRAME_TIME);
    let mut runner = Runner::new(channel, region, engine);

    runner
        .boot(&args.core, &args.game)
        .context("Failed to load core and game")?;

    info!("Runner started for {}", args.game.display());
    runner.run()?;
    info!("Runner finished after {} frames", runner.engine().frames());

    Ok(())
}
