//! RetroTouch Core - runtime communication between the UI and the emulation
//! process.
//!
//! The UI process runs a [`Supervisor`] that spawns a runner process, talks to
//! it over a framed RPC [`ipc`] channel carried by two pipes, and shares input
//! state and overlay images with it through a file-backed [`region`]. The
//! runner process drives an [`Engine`] from a single-threaded [`Runner`] loop.
//!
//! # Example
//!
//! ```rust,ignore
//! use retrotouch_core::{Frontend, LaunchConfig, Supervisor};
//!
//! struct Ui;
//!
//! impl Frontend for Ui {
//!     fn on_core_ready(&mut self, window_id: u64) {
//!         println!("embedding window {}", window_id);
//!     }
//!     fn on_core_crashed(&mut self) {
//!         eprintln!("emulator crashed");
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> retrotouch_core::Result<()> {
//!     let mut supervisor = Supervisor::with_command_launcher(LaunchConfig::default());
//!     supervisor.start("/cores/snes9x.so", "/games/game.sfc")?;
//!
//!     let mut ui = Ui;
//!     while supervisor.pump(&mut ui).await {}
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod ipc;
pub mod platform;
pub mod region;
pub mod runner;
pub mod supervisor;

// Re-export commonly used types
pub use config::{BackgroundColor, EnvVars};
pub use error::{Result, RetroError};
pub use ipc::{Channel, Event, Request};
pub use region::{ImageCache, ImageSnapshot, InputSnapshot, RegionReader, SharedRegion};
pub use runner::{Engine, EngineEvent, HeadlessEngine, Runner};
pub use supervisor::{
    CommandLauncher, CoreLauncher, CoreProcess, Frontend, LaunchConfig, SessionState,
    SpawnRequest, Supervisor,
};
