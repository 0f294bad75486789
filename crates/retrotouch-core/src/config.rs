//! Centralized configuration for the runtime core.
//!
//! This module provides the constants shared by both processes: frame limits,
//! region layout sizes, loop timings and the names of the environment
//! variables that make up the spawn contract.

use std::time::Duration;

/// RPC channel limits.
pub struct ChannelConfig;

impl ChannelConfig {
    /// Size of the length prefix in front of every frame.
    pub const LENGTH_PREFIX_SIZE: usize = 4;
    /// Frames above this size are treated as a corrupted stream.
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
}

/// Shared memory region layout.
pub struct RegionConfig;

impl RegionConfig {
    /// Number of image slots in the header.
    pub const MAX_IMAGES: usize = 4;
    /// Number of analog sticks carried in the input state.
    pub const MAX_ANALOGS: usize = 2;
    /// Smallest backing allocation; the header always fits comfortably.
    pub const MIN_SIZE: usize = 5 * 102_400;
    /// Alignment applied to image data offsets.
    pub const DATA_ALIGN: usize = 16;
    /// Prefix used for temporary backing files.
    pub const TEMP_PREFIX: &'static str = "retrotouch-";
}

/// Emulation-side loop timing.
pub struct RunnerConfig;

impl RunnerConfig {
    /// Channel poll timeout while paused, keeps the CPU idle.
    pub const PAUSED_POLL_INTERVAL: Duration = Duration::from_millis(100);
    /// Channel poll timeout while running.
    pub const RUNNING_POLL_INTERVAL: Duration = Duration::ZERO;
}

/// UI-side session management.
pub struct SupervisorConfig;

impl SupervisorConfig {
    /// Interval of the keep-alive `ping` call.
    pub const PING_INTERVAL: Duration = Duration::from_secs(2);
    /// Grace period between SIGTERM and SIGKILL on teardown.
    pub const KILL_TIMEOUT: Duration = Duration::from_millis(500);
    /// Capacity of the inbound event queue between reader task and supervisor.
    pub const EVENT_QUEUE_CAPACITY: usize = 64;
    /// Default runner executable name, looked up on `PATH`.
    pub const RUNNER_BINARY: &'static str = "retrotouch-runner";
}

/// Environment variables of the spawn contract.
pub struct EnvVars;

impl EnvVars {
    pub const READ_FD: &'static str = "RT_RUNNER_READ_FD";
    pub const WRITE_FD: &'static str = "RT_RUNNER_WRITE_FD";
    pub const WINDOW_ID: &'static str = "RT_RUNNER_WINDOW_ID";
    pub const SHM_FILENAME: &'static str = "RT_RUNNER_SHM_FILENAME";
    pub const BACKGROUND_COLOR: &'static str = "RT_BACKGROUND_COLOR";
}

/// Background color passed to the engine at startup.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BackgroundColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl BackgroundColor {
    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Encode as the space separated triple used in `RT_BACKGROUND_COLOR`.
    pub fn to_env_value(&self) -> String {
        format!("{} {} {}", self.r, self.g, self.b)
    }

    /// Parse the `RT_BACKGROUND_COLOR` value.
    ///
    /// A single `0` (the historical default) means black.
    pub fn parse(value: &str) -> Option<Self> {
        let parts: Vec<f32> = value
            .split_whitespace()
            .map(|p| p.parse::<f32>().ok())
            .collect::<Option<Vec<_>>>()?;
        match parts.as_slice() {
            [v] if *v == 0.0 => Some(Self::default()),
            [r, g, b] => Some(Self::new(*r, *g, *b)),
            _ => None,
        }
    }
}

impl std::str::FromStr for BackgroundColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("expected \"r g b\", got {:?}", s))
    }
}
