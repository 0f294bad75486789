//! Emulation-side runner loop.
//!
//! Single-threaded: each tick drains pending requests from the channel, copies
//! input and overlay images out of the shared region into the engine, then
//! steps the engine once. While paused the tick blocks on the channel for up to
//! [`RunnerConfig::PAUSED_POLL_INTERVAL`] so an idle runner does not spin.

pub mod engine;

pub use engine::{Engine, EngineEvent, HeadlessEngine};

use crate::config::RunnerConfig;
use crate::ipc::{Channel, Event, Message, Request, RpcCall};
use crate::region::{ImageCache, RegionReader};
use crate::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Engine plus the pause state requests act on.
struct Host<E> {
    engine: E,
    paused: bool,
}

impl<E: Engine> Host<E> {
    fn handle_call(&mut self, channel: &mut Channel, call: RpcCall) -> Result<()> {
        let request = Request::from_call(&call)?;
        debug!("Handling {}", request.method());

        match request {
            Request::SetScreenSize { width, height } => {
                self.engine.set_screen_size(width, height);
            }
            Request::SaveState { path } => {
                self.engine.save_state(&path)?;
                channel.send(&Event::StateSaved { path })?;
            }
            Request::LoadState { path } => self.engine.load_state(&path)?,
            Request::SaveScreenshot { path } => self.engine.save_screenshot(&path)?,
            Request::SaveBoth {
                prefix,
                state_ext,
                screenshot_ext,
            } => {
                let state = PathBuf::from(format!("{}.{}", prefix, state_ext));
                let screenshot = PathBuf::from(format!("{}.{}", prefix, screenshot_ext));
                self.engine.save_state(&state)?;
                if let Err(e) = self.engine.save_screenshot(&screenshot) {
                    warn!("Failed to save screenshot (state saved with no problems): {}", e);
                }
                channel.send(&Event::StateSaved { path: state })?;
            }
            Request::SetPaused(paused) => self.set_paused(channel, paused)?,
            Request::SetVsync(enabled) => self.engine.set_vsync(enabled)?,
            Request::Ping => {}
            Request::ConfigChanged => self.engine.variables_changed(),
            Request::SetBackgroundColor(color) => self.engine.set_background_color(color),
        }
        Ok(())
    }

    fn set_paused(&mut self, channel: &mut Channel, paused: bool) -> Result<()> {
        if self.paused == paused {
            return Ok(());
        }
        self.paused = paused;
        channel.send(&Event::PausedChanged(paused))?;
        if paused {
            debug!("Core paused");
        } else {
            debug!("Core resumed");
        }
        Ok(())
    }

    fn forward_events(&mut self, channel: &mut Channel) -> Result<()> {
        for event in self.engine.drain_events() {
            let event = match event {
                EngineEvent::RenderSizeChanged { width, height } => {
                    Event::RenderSizeChanged { width, height }
                }
                EngineEvent::VariableDeclared {
                    key,
                    description,
                    options,
                } => Event::VariableAdded {
                    key,
                    description,
                    options,
                },
            };
            channel.send(&event)?;
        }
        Ok(())
    }
}

/// Drives one engine from the channel and the shared region.
pub struct Runner<E> {
    channel: Channel,
    region: RegionReader,
    images: ImageCache,
    host: Host<E>,
}

impl<E: Engine> Runner<E> {
    /// Create a runner. Starts paused.
    pub fn new(channel: Channel, region: RegionReader, engine: E) -> Self {
        Self {
            channel,
            region,
            images: ImageCache::new(),
            host: Host {
                engine,
                paused: true,
            },
        }
    }

    /// Announce the render surface, then load the core and the game.
    ///
    /// `window_created` is always the first call the supervisor sees. A load
    /// failure is returned and should end the process.
    pub fn boot(&mut self, core: &Path, game: &Path) -> Result<()> {
        let window_id = self.host.engine.window_id();
        self.channel.send(&Event::WindowCreated { window_id })?;

        self.host.engine.core_load(core)?;
        self.host.engine.game_load(game)?;
        self.host.forward_events(&mut self.channel)?;

        if self.host.engine.check_saving_supported() {
            self.channel.send(&Event::SavingSupported)?;
        }
        info!("Runner booted: core {}, game {}", core.display(), game.display());
        Ok(())
    }

    /// One iteration of the loop.
    pub fn tick(&mut self) -> Result<()> {
        let timeout = if self.host.paused {
            RunnerConfig::PAUSED_POLL_INTERVAL
        } else {
            RunnerConfig::RUNNING_POLL_INTERVAL
        };

        let host = &mut self.host;
        self.channel
            .drain(timeout, |channel, call| host.handle_call(channel, call))?;

        let input = self.region.input();
        self.host.engine.apply_input(&input);
        self.host.engine.set_scale_factor(self.region.scale_factor());

        for slot in self.images.refresh(&mut self.region)? {
            self.host.engine.apply_image(slot, self.images.get(slot));
        }

        if self.host.paused {
            self.host.engine.step_paused();
        } else {
            self.host.engine.step();
        }

        self.host.forward_events(&mut self.channel)
    }

    /// Tick until the supervisor goes away.
    ///
    /// Loss of the channel is the normal way for a runner to end and is not an
    /// error. Anything else fatal is returned.
    pub fn run(&mut self) -> Result<()> {
        loop {
            match self.tick() {
                Ok(()) => {}
                Err(e) if e.is_peer_loss() => {
                    info!("Supervisor gone, runner stopping: {}", e);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn is_paused(&self) -> bool {
        self.host.paused
    }

    pub fn engine(&self) -> &E {
        &self.host.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackgroundColor;
    use crate::ipc::protocol::{decode_call, read_frame, FrameWriter};
    use crate::platform::pipe_pair;
    use crate::region::SharedRegion;
    use std::fs::{self, File};
    use tempfile::TempDir;

    struct Harness {
        dir: TempDir,
        region: SharedRegion,
        to_runner: FrameWriter<File>,
        from_runner: File,
        runner: Runner<HeadlessEngine>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let region = SharedRegion::create(0).unwrap();
            let (runner_read, sup_write) = pipe_pair().unwrap();
            let (sup_read, runner_write) = pipe_pair().unwrap();

            let channel = Channel::new(runner_read, runner_write);
            let reader = RegionReader::open(region.path()).unwrap();
            let engine = HeadlessEngine::new(77, BackgroundColor::default())
                .with_variable("frameskip", "Frame skip; 0|1");

            Self {
                dir,
                region,
                to_runner: FrameWriter::new(File::from(sup_write)),
                from_runner: File::from(sup_read),
                runner: Runner::new(channel, reader, engine),
            }
        }

        fn boot(&mut self) {
            let core = self.dir.path().join("core.so");
            let game = self.dir.path().join("game.rom");
            fs::write(&core, b"core").unwrap();
            fs::write(&game, b"game").unwrap();
            self.runner.boot(&core, &game).unwrap();
        }

        fn request(&mut self, request: Request) {
            self.to_runner.send(&request).unwrap();
            self.runner.tick().unwrap();
        }

        fn next_event(&mut self) -> Event {
            let payload = read_frame(&mut self.from_runner).unwrap();
            Event::from_call(&decode_call(&payload).unwrap()).unwrap()
        }
    }

    #[test]
    fn test_boot_announces_window_first() {
        let mut h = Harness::new();
        h.boot();

        assert_eq!(h.next_event(), Event::WindowCreated { window_id: 77 });
        assert!(matches!(h.next_event(), Event::VariableAdded { key, .. } if key == "frameskip"));
        assert!(matches!(h.next_event(), Event::RenderSizeChanged { .. }));
        assert_eq!(h.next_event(), Event::SavingSupported);
        assert!(h.runner.is_paused());
    }

    #[test]
    fn test_boot_fails_on_missing_core() {
        let mut h = Harness::new();
        let missing = h.dir.path().join("missing.so");
        let err = h.runner.boot(&missing, &missing).unwrap_err();
        assert!(matches!(err, crate::RetroError::Engine { .. }));
        assert_eq!(h.next_event(), Event::WindowCreated { window_id: 77 });
    }

    #[test]
    fn test_pause_events_only_on_change() {
        let mut h = Harness::new();
        h.boot();
        for _ in 0..4 {
            h.next_event();
        }

        h.request(Request::SetPaused(false));
        assert_eq!(h.next_event(), Event::PausedChanged(false));
        assert!(!h.runner.is_paused());

        h.request(Request::SetPaused(false));
        h.request(Request::SetPaused(true));
        assert_eq!(h.next_event(), Event::PausedChanged(true));
        assert!(h.runner.is_paused());
    }

    #[test]
    fn test_ticks_step_or_step_paused() {
        let mut h = Harness::new();
        h.boot();

        h.runner.tick().unwrap();
        assert_eq!(h.runner.engine().frames(), 0);
        assert_eq!(h.runner.engine().paused_frames(), 1);

        h.request(Request::SetPaused(false));
        h.runner.tick().unwrap();
        assert_eq!(h.runner.engine().frames(), 2);
    }

    #[test]
    fn test_save_state_reports_only_success() {
        let mut h = Harness::new();
        h.boot();
        for _ in 0..4 {
            h.next_event();
        }

        let bad = h.dir.path().join("no/such/dir/state");
        h.request(Request::SaveState { path: bad });

        let good = h.dir.path().join("slot.state");
        h.request(Request::SaveState { path: good.clone() });
        assert_eq!(h.next_event(), Event::StateSaved { path: good.clone() });
        assert!(good.exists());
    }

    #[test]
    fn test_save_both_tolerates_screenshot_failure() {
        let mut h = Harness::new();
        h.boot();
        for _ in 0..4 {
            h.next_event();
        }

        let prefix = h.dir.path().join("quick").to_string_lossy().into_owned();
        h.request(Request::SaveBoth {
            prefix: prefix.clone(),
            state_ext: "state".into(),
            screenshot_ext: "missing-dir/shot.ppm".into(),
        });

        let state = PathBuf::from(format!("{}.state", prefix));
        assert_eq!(h.next_event(), Event::StateSaved { path: state.clone() });
        assert!(state.exists());
    }

    #[test]
    fn test_input_and_images_reach_engine() {
        let mut h = Harness::new();
        h.boot();

        h.region.set_button(5, true);
        h.region.set_image_pos(2, 1, 2, 3, 4).unwrap();
        h.region.set_image(2, &[9u8; 12]).unwrap();
        h.runner.tick().unwrap();

        assert!(h.runner.engine().input().is_pressed(5));
        let image = h.runner.engine().image(2).unwrap();
        assert_eq!(image.pixels, vec![9u8; 12]);
        assert_eq!((image.x, image.y, image.width, image.height), (1, 2, 3, 4));

        h.region.clear_images().unwrap();
        h.runner.tick().unwrap();
        assert!(h.runner.engine().image(2).is_none());
    }

    #[test]
    fn test_scale_factor_reaches_engine() {
        let mut h = Harness::new();
        h.boot();

        h.runner.tick().unwrap();
        assert_eq!(h.runner.engine().scale_factor(), 1.0);

        h.region.set_scale_factor(2.5);
        h.runner.tick().unwrap();
        assert_eq!(h.runner.engine().scale_factor(), 2.5);
    }

    #[test]
    fn test_config_changed_and_screen_size() {
        let mut h = Harness::new();
        h.boot();

        h.request(Request::ConfigChanged);
        h.request(Request::SetScreenSize {
            width: 640,
            height: 480,
        });
        h.request(Request::SetVsync(true));
        assert_eq!(h.runner.engine().variables_changed_count(), 1);
        assert_eq!(h.runner.engine().screen_size(), (640, 480));
        assert!(h.runner.engine().vsync());
    }

    #[test]
    fn test_run_ends_cleanly_when_supervisor_leaves() {
        let mut h = Harness::new();
        h.boot();

        h.to_runner.send(&Request::Ping).unwrap();
        drop(h.to_runner);
        h.runner.run().unwrap();
    }
}
