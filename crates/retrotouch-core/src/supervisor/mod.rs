//! UI-side supervisor of the emulation process.
//!
//! Owns at most one [`link::ProcessLink`] at a time: the runner process, both
//! pipe ends we keep, the shared region and the receive task. Events from the
//! runner are delivered to a [`Frontend`] from [`Supervisor::pump`], which the
//! UI awaits on its own (single-threaded) tokio runtime.
//!
//! Loss of the channel is the only crash signal. It tears the link down and
//! reports `on_core_crashed` exactly once.

pub mod launcher;
mod link;

pub use launcher::{
    ChildProcess, CommandLauncher, CoreLauncher, CoreProcess, LaunchConfig, SpawnRequest,
};

use crate::config::{BackgroundColor, SupervisorConfig};
use crate::error::{Result, RetroError};
use crate::ipc::{Event, Inbound, Request};
use crate::region::{InputSnapshot, SharedRegion};
use link::ProcessLink;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Lifecycle of the supervised session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing started yet.
    Idle,
    /// Runner spawned, waiting for `window_created`.
    Starting,
    Running,
    /// Torn down on request.
    Closed,
    /// The runner went away on its own.
    Crashed,
}

/// Callbacks into the UI.
pub trait Frontend {
    /// The runner created its render surface.
    fn on_core_ready(&mut self, window_id: u64);

    /// The runner was lost. The session is already torn down.
    fn on_core_crashed(&mut self);

    fn on_render_size_changed(&mut self, _width: u32, _height: u32) {}

    fn on_playpause_changed(&mut self, _paused: bool) {}

    fn on_saving_supported(&mut self) {}

    fn on_state_saved(&mut self, _path: &Path) {}

    fn on_variable_added(&mut self, _key: &str, _description: &str, _options: &[String]) {}
}

/// What woke up [`Supervisor::pump`].
enum Wake {
    Inbound(Option<Inbound>),
    Ping,
}

/// Starts, talks to and tears down the emulation process.
pub struct Supervisor {
    config: LaunchConfig,
    launcher: Box<dyn CoreLauncher>,
    link: Option<ProcessLink>,
    state: SessionState,
    paused: bool,
    window_id: Option<u64>,
    saving_supported: bool,
}

impl Supervisor {
    pub fn new(config: LaunchConfig, launcher: impl CoreLauncher + 'static) -> Self {
        Self {
            config,
            launcher: Box::new(launcher),
            link: None,
            state: SessionState::Idle,
            paused: true,
            window_id: None,
            saving_supported: false,
        }
    }

    /// Supervisor that spawns the runner binary named in `config`.
    pub fn with_command_launcher(config: LaunchConfig) -> Self {
        Self::new(config, CommandLauncher)
    }

    /// Start a runner for `game` on `core`, replacing any running one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, core: impl AsRef<Path>, game: impl AsRef<Path>) -> Result<()> {
        self.destroy();

        let link = ProcessLink::open(
            &self.config,
            self.launcher.as_ref(),
            core.as_ref(),
            game.as_ref(),
        )?;
        self.link = Some(link);
        self.state = SessionState::Starting;
        self.paused = true;
        self.window_id = None;
        self.saving_supported = false;
        info!("Started session for {}", game.as_ref().display());
        Ok(())
    }

    /// Wait for the next event or keep-alive tick and act on it.
    ///
    /// Cancel-safe. Returns `false` once there is no session left to wait on.
    pub async fn pump<F: Frontend + ?Sized>(&mut self, frontend: &mut F) -> bool {
        let Some(link) = self.link.as_mut() else {
            return false;
        };

        let wake = tokio::select! {
            item = link.inbound.recv() => Wake::Inbound(item),
            _ = link.ping.tick() => Wake::Ping,
        };

        match wake {
            Wake::Inbound(Some(Inbound::Event(event))) => self.handle_event(event, frontend),
            Wake::Inbound(Some(Inbound::PeerLost(reason))) => self.crash(&reason, frontend),
            Wake::Inbound(None) => self.crash("event reader ended", frontend),
            Wake::Ping => {
                if let Err(e) = self.ping() {
                    if e.is_peer_loss() {
                        self.crash(&e.to_string(), frontend);
                    } else {
                        warn!("Keep-alive failed: {}", e);
                    }
                }
            }
        }
        self.link.is_some()
    }

    fn handle_event<F: Frontend + ?Sized>(&mut self, event: Event, frontend: &mut F) {
        debug!("Event from runner: {:?}", event);
        match event {
            Event::WindowCreated { window_id } => {
                self.state = SessionState::Running;
                self.window_id = Some(window_id);
                frontend.on_core_ready(window_id);
                if self.config.autostart {
                    if let Err(e) = self.set_paused(false) {
                        warn!("Failed to start emulation: {}", e);
                    }
                }
            }
            Event::RenderSizeChanged { width, height } => {
                frontend.on_render_size_changed(width, height);
            }
            Event::PausedChanged(paused) => {
                self.paused = paused;
                frontend.on_playpause_changed(paused);
            }
            Event::SavingSupported => {
                self.saving_supported = true;
                frontend.on_saving_supported();
            }
            Event::StateSaved { path } => frontend.on_state_saved(&path),
            Event::VariableAdded {
                key,
                description,
                options,
            } => frontend.on_variable_added(&key, &description, &options),
        }
    }

    fn crash<F: Frontend + ?Sized>(&mut self, reason: &str, frontend: &mut F) {
        if self.link.is_none() {
            return;
        }
        warn!("Runner lost: {}", reason);
        self.destroy();
        self.state = SessionState::Crashed;
        frontend.on_core_crashed();
    }

    /// Tear down the running session, if any. Safe to call repeatedly.
    ///
    /// The region is removed before this returns. Inside a tokio runtime the
    /// runner is stopped (SIGTERM, then SIGKILL after
    /// [`SupervisorConfig::KILL_TIMEOUT`]) on the blocking pool; outside one
    /// this blocks for up to that timeout.
    pub fn destroy(&mut self) {
        if let Some(link) = self.link.take() {
            debug!("Destroying session");
            link.close(SupervisorConfig::KILL_TIMEOUT);
            self.state = SessionState::Closed;
            self.window_id = None;
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Last pause state reported by the runner. A fresh session starts paused.
    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn window_id(&self) -> Option<u64> {
        self.window_id
    }

    pub fn saving_supported(&self) -> bool {
        self.saving_supported
    }

    pub fn region_path(&self) -> Option<PathBuf> {
        self.link.as_ref().map(|link| link.region.path().to_path_buf())
    }

    pub fn process_id(&self) -> Option<u32> {
        self.link.as_ref().and_then(|link| link.process_id())
    }

    /// Whether the runner process is still running. Crash detection does not
    /// depend on this; it only reflects the process table.
    pub fn process_alive(&mut self) -> bool {
        self.link.as_mut().is_some_and(|link| link.process_alive())
    }

    fn link_mut(&mut self) -> Result<&mut ProcessLink> {
        self.link.as_mut().ok_or(RetroError::SessionClosed)
    }

    fn region(&self) -> Result<&SharedRegion> {
        self.link
            .as_ref()
            .map(|link| &link.region)
            .ok_or(RetroError::SessionClosed)
    }

    fn send(&mut self, request: Request) -> Result<()> {
        self.link_mut()?.send(&request)
    }

    // Region writes

    pub fn set_button(&self, index: u8, pressed: bool) -> Result<()> {
        self.region()?.set_button(index, pressed);
        Ok(())
    }

    pub fn clear_buttons(&self) -> Result<()> {
        self.region()?.clear_buttons();
        Ok(())
    }

    pub fn set_analog(&self, stick: usize, x: i16, y: i16) -> Result<()> {
        self.region()?.set_analog(stick, x, y);
        Ok(())
    }

    pub fn set_mouse(&self, x: i16, y: i16) -> Result<()> {
        self.region()?.set_mouse(x, y);
        Ok(())
    }

    pub fn set_mouse_button(&self, index: u8, pressed: bool) -> Result<()> {
        self.region()?.set_mouse_button(index, pressed);
        Ok(())
    }

    pub fn input_snapshot(&self) -> Result<InputSnapshot> {
        Ok(self.region()?.input_snapshot())
    }

    /// Publish an overlay image. Returns the slot's new version.
    pub fn set_image(&mut self, index: usize, bytes: &[u8]) -> Result<u32> {
        self.link_mut()?.region.set_image(index, bytes)
    }

    pub fn set_image_pos(
        &self,
        index: usize,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.region()?.set_image_pos(index, x, y, width, height)
    }

    pub fn clear_images(&self) -> Result<()> {
        self.region()?.clear_images()
    }

    pub fn set_scale_factor(&self, factor: f32) -> Result<()> {
        self.region()?.set_scale_factor(factor);
        Ok(())
    }

    // Requests

    pub fn set_screen_size(&mut self, width: u32, height: u32) -> Result<()> {
        self.send(Request::SetScreenSize { width, height })
    }

    pub fn save_state(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.send(Request::SaveState { path: path.into() })
    }

    pub fn load_state(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.send(Request::LoadState { path: path.into() })
    }

    pub fn save_screenshot(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.send(Request::SaveScreenshot { path: path.into() })
    }

    /// Save state and screenshot side by side as `<prefix>.<ext>`.
    pub fn save_both(
        &mut self,
        prefix: impl Into<String>,
        state_ext: impl Into<String>,
        screenshot_ext: impl Into<String>,
    ) -> Result<()> {
        self.send(Request::SaveBoth {
            prefix: prefix.into(),
            state_ext: state_ext.into(),
            screenshot_ext: screenshot_ext.into(),
        })
    }

    pub fn set_paused(&mut self, paused: bool) -> Result<()> {
        self.send(Request::SetPaused(paused))
    }

    pub fn set_vsync(&mut self, enabled: bool) -> Result<()> {
        self.send(Request::SetVsync(enabled))
    }

    pub fn ping(&mut self) -> Result<()> {
        self.send(Request::Ping)
    }

    pub fn config_changed(&mut self) -> Result<()> {
        self.send(Request::ConfigChanged)
    }

    pub fn set_background_color(&mut self, color: BackgroundColor) -> Result<()> {
        self.config.background = color;
        self.send(Request::SetBackgroundColor(color))
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.destroy();
    }
}
