//! Spawning the emulation process.

#![allow(unsafe_code)]

use crate::config::{BackgroundColor, EnvVars, RegionConfig, SupervisorConfig};
use crate::error::{Result, RetroError};
use crate::platform;
use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::Duration;
use tracing::{debug, error, info};

/// Configuration for launching a runner process.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Path to the runner executable.
    pub runner_path: PathBuf,
    /// Id of the UI surface the runner embeds into.
    pub window_id: u64,
    /// Color drawn behind the game screen.
    pub background: BackgroundColor,
    /// Initial size of the shared region in bytes.
    pub region_size: usize,
    /// Interval between keep-alive pings.
    pub ping_interval: Duration,
    /// Resume emulation as soon as the runner reports its window.
    pub autostart: bool,
    /// Additional arguments passed after `core game`.
    pub extra_args: Vec<String>,
    /// Environment variables to set.
    pub env_vars: HashMap<String, String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            runner_path: PathBuf::from(SupervisorConfig::RUNNER_BINARY),
            window_id: 0,
            background: BackgroundColor::default(),
            region_size: RegionConfig::MIN_SIZE,
            ping_interval: SupervisorConfig::PING_INTERVAL,
            autostart: true,
            extra_args: vec![],
            env_vars: HashMap::new(),
        }
    }
}

impl LaunchConfig {
    pub fn new(runner_path: impl AsRef<Path>) -> Self {
        Self {
            runner_path: runner_path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn with_window_id(mut self, window_id: u64) -> Self {
        self.window_id = window_id;
        self
    }

    pub fn with_background(mut self, background: BackgroundColor) -> Self {
        self.background = background;
        self
    }

    pub fn with_region_size(mut self, size: usize) -> Self {
        self.region_size = size;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }
}

/// Everything a launcher needs to start one runner.
#[derive(Debug)]
pub struct SpawnRequest<'a> {
    pub config: &'a LaunchConfig,
    pub core: &'a Path,
    pub game: &'a Path,
    /// Runner's end of the supervisor → runner pipe.
    pub read_fd: OwnedFd,
    /// Runner's end of the runner → supervisor pipe.
    pub write_fd: OwnedFd,
    pub region_path: &'a Path,
}

/// A running emulation process.
pub trait CoreProcess: Send {
    fn id(&self) -> Option<u32>;

    fn is_alive(&mut self) -> bool;

    /// Stop the process, forcefully after `timeout`, and reap it.
    fn terminate(&mut self, timeout: Duration) -> Result<()>;
}

/// Trait for starting runner processes.
///
/// The launcher owns the runner's pipe ends from the request and must close
/// its copies once the runner has them.
pub trait CoreLauncher: Send {
    fn launch(&self, request: SpawnRequest<'_>) -> Result<Box<dyn CoreProcess>>;
}

/// Launches the runner binary as a child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandLauncher;

impl CommandLauncher {
    fn build_command(request: &SpawnRequest<'_>) -> Command {
        let config = request.config;
        let mut cmd = Command::new(&config.runner_path);
        cmd.arg(request.core);
        cmd.arg(request.game);
        cmd.args(&config.extra_args);

        for (key, value) in &config.env_vars {
            cmd.env(key, value);
        }
        cmd.env(EnvVars::READ_FD, request.read_fd.as_raw_fd().to_string());
        cmd.env(EnvVars::WRITE_FD, request.write_fd.as_raw_fd().to_string());
        cmd.env(EnvVars::WINDOW_ID, config.window_id.to_string());
        cmd.env(EnvVars::SHM_FILENAME, request.region_path);
        cmd.env(EnvVars::BACKGROUND_COLOR, config.background.to_env_value());
        cmd
    }
}

impl CoreLauncher for CommandLauncher {
    fn launch(&self, request: SpawnRequest<'_>) -> Result<Box<dyn CoreProcess>> {
        let runner_path = &request.config.runner_path;
        let mut cmd = Self::build_command(&request);

        // Only these two descriptors may cross the exec. Clearing close-on-exec
        // in the forked child keeps them from leaking into processes spawned
        // concurrently by other threads.
        let inherited = [request.read_fd.as_raw_fd(), request.write_fd.as_raw_fd()];
        // SAFETY: the closure only calls fcntl, which is async-signal-safe, and
        // touches no memory shared with the parent.
        unsafe {
            cmd.pre_exec(move || {
                for fd in inherited {
                    if libc::fcntl(fd, libc::F_SETFD, 0) == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }

        info!(
            "Launching runner {} for {}",
            runner_path.display(),
            request.game.display()
        );

        let child = cmd.spawn().map_err(|e| {
            error!("Failed to spawn runner: {}", e);
            RetroError::Launch {
                path: runner_path.clone(),
                message: e.to_string(),
            }
        })?;
        info!("Launched runner with PID {}", child.id());

        // The child has its own copies now
        drop(request.read_fd);
        drop(request.write_fd);

        Ok(Box::new(ChildProcess { child }))
    }
}

/// [`CoreProcess`] backed by a `std::process::Child`.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
}

impl CoreProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn terminate(&mut self, timeout: Duration) -> Result<()> {
        let graceful = platform::terminate_child(&mut self.child, timeout)?;
        if !graceful {
            debug!("Runner {} had to be killed", self.child.id());
        }
        Ok(())
    }
}
