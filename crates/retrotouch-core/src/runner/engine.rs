//! Emulation engine seam used by the runner loop.
//!
//! The engine owns the emulated core, rendering and save files. The runner only
//! drives it: one step per tick, input and overlay images pushed in before each
//! step, events pulled out after.

use crate::config::{BackgroundColor, RegionConfig};
use crate::error::{Result, RetroError};
use crate::region::{ImageSnapshot, InputSnapshot};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Something the engine wants reported to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    RenderSizeChanged { width: u32, height: u32 },
    /// The core declared a configurable option.
    VariableDeclared {
        key: String,
        description: String,
        options: Vec<String>,
    },
}

impl EngineEvent {
    /// Parse a core option declaration of the form `"Description; a|b|c"`.
    ///
    /// The first option is the core's default.
    pub fn variable(key: impl Into<String>, declaration: &str) -> Result<Self> {
        let key = key.into();
        let (description, values) = declaration.split_once("; ").ok_or_else(|| {
            RetroError::engine("declare_variable", format!("malformed declaration for {}", key))
        })?;
        let options: Vec<String> = values.split('|').map(str::to_string).collect();
        if options.iter().any(String::is_empty) {
            return Err(RetroError::engine(
                "declare_variable",
                format!("empty option in declaration for {}", key),
            ));
        }
        Ok(EngineEvent::VariableDeclared {
            key,
            description: description.to_string(),
            options,
        })
    }
}

/// Trait for emulation engines driven by [`super::Runner`].
pub trait Engine {
    /// Id of the render surface the UI should embed.
    fn window_id(&self) -> u64;

    /// Load the emulator core. Failure is fatal to the runner.
    fn core_load(&mut self, path: &Path) -> Result<()>;

    /// Load the game into the core. Failure is fatal to the runner.
    fn game_load(&mut self, path: &Path) -> Result<()>;

    /// Run one emulated frame.
    fn step(&mut self);

    /// Redraw without advancing emulation.
    fn step_paused(&mut self);

    fn apply_input(&mut self, input: &InputSnapshot);

    /// UI display scale, applied to overlay placement. Called every tick.
    fn set_scale_factor(&mut self, factor: f32);

    /// Show, replace or (with `None`) remove an overlay image.
    fn apply_image(&mut self, slot: usize, image: Option<&ImageSnapshot>);

    fn save_state(&mut self, path: &Path) -> Result<()>;

    fn load_state(&mut self, path: &Path) -> Result<()>;

    fn save_screenshot(&mut self, path: &Path) -> Result<()>;

    fn set_screen_size(&mut self, width: u32, height: u32);

    fn set_vsync(&mut self, enabled: bool) -> Result<()>;

    fn set_background_color(&mut self, color: BackgroundColor);

    /// Whether the loaded core supports save states.
    fn check_saving_supported(&self) -> bool;

    /// Core options were edited; the core re-reads them on its next step.
    fn variables_changed(&mut self);

    /// Take events raised since the last call.
    fn drain_events(&mut self) -> Vec<EngineEvent>;
}

/// Default render size reported by [`HeadlessEngine`] after a game loads.
pub const HEADLESS_RENDER_SIZE: (u32, u32) = (320, 240);

/// Frame time of a 60 Hz display.
pub const HEADLESS_FRAME_TIME: Duration = Duration::from_micros(16_667);

/// Save state file written by [`HeadlessEngine`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HeadlessState {
    pub core: PathBuf,
    pub game: PathBuf,
    pub frames: u64,
    pub buttons: u32,
}

/// Engine without a native core or renderer.
///
/// Accepts any existing core and game file, counts frames and writes its
/// counters as JSON save states. Screenshots are solid background PPM images.
#[derive(Debug, Default)]
pub struct HeadlessEngine {
    window_id: u64,
    core: Option<PathBuf>,
    game: Option<PathBuf>,
    frames: u64,
    paused_frames: u64,
    frame_time: Option<Duration>,
    last_frame: Option<Instant>,
    screen: (u32, u32),
    vsync: bool,
    scale_factor: f32,
    background: BackgroundColor,
    input: InputSnapshot,
    images: [Option<ImageSnapshot>; RegionConfig::MAX_IMAGES],
    declared: Vec<(String, String)>,
    variables_changed: u32,
    events: Vec<EngineEvent>,
}

impl HeadlessEngine {
    pub fn new(window_id: u64, background: BackgroundColor) -> Self {
        Self {
            window_id,
            background,
            screen: HEADLESS_RENDER_SIZE,
            scale_factor: 1.0,
            ..Default::default()
        }
    }

    /// Declare a core option when the core loads, as `"Description; a|b|c"`.
    pub fn with_variable(mut self, key: impl Into<String>, declaration: impl Into<String>) -> Self {
        self.declared.push((key.into(), declaration.into()));
        self
    }

    /// Pace [`Engine::step`] to at most one frame per `frame_time`.
    pub fn with_frame_time(mut self, frame_time: Duration) -> Self {
        self.frame_time = Some(frame_time);
        self
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn paused_frames(&self) -> u64 {
        self.paused_frames
    }

    pub fn input(&self) -> &InputSnapshot {
        &self.input
    }

    pub fn image(&self, slot: usize) -> Option<&ImageSnapshot> {
        self.images.get(slot)?.as_ref()
    }

    pub fn screen_size(&self) -> (u32, u32) {
        self.screen
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }

    pub fn scale_factor(&self) -> f32 {
        self.scale_factor
    }

    pub fn background(&self) -> BackgroundColor {
        self.background
    }

    pub fn variables_changed_count(&self) -> u32 {
        self.variables_changed
    }

    fn require_file(operation: &str, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(RetroError::engine(
                operation,
                format!("{} does not exist", path.display()),
            ));
        }
        Ok(())
    }

    fn require_game(&self, operation: &str) -> Result<()> {
        if self.game.is_none() {
            return Err(RetroError::engine(operation, "no game loaded"));
        }
        Ok(())
    }
}

impl Engine for HeadlessEngine {
    fn window_id(&self) -> u64 {
        self.window_id
    }

    fn core_load(&mut self, path: &Path) -> Result<()> {
        Self::require_file("core_load", path)?;
        info!("Loaded core {}", path.display());
        self.core = Some(path.to_path_buf());

        for (key, declaration) in std::mem::take(&mut self.declared) {
            self.events.push(EngineEvent::variable(key, &declaration)?);
        }
        Ok(())
    }

    fn game_load(&mut self, path: &Path) -> Result<()> {
        if self.core.is_none() {
            return Err(RetroError::engine("game_load", "no core loaded"));
        }
        Self::require_file("game_load", path)?;
        info!("Loaded game {}", path.display());
        self.game = Some(path.to_path_buf());

        let (width, height) = HEADLESS_RENDER_SIZE;
        self.events
            .push(EngineEvent::RenderSizeChanged { width, height });
        Ok(())
    }

    fn step(&mut self) {
        if let (Some(frame_time), Some(last)) = (self.frame_time, self.last_frame) {
            let elapsed = last.elapsed();
            if elapsed < frame_time {
                std::thread::sleep(frame_time - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());
        self.frames += 1;
    }

    fn step_paused(&mut self) {
        self.paused_frames += 1;
    }

    fn apply_input(&mut self, input: &InputSnapshot) {
        self.input = *input;
    }

    fn set_scale_factor(&mut self, factor: f32) {
        self.scale_factor = factor;
    }

    fn apply_image(&mut self, slot: usize, image: Option<&ImageSnapshot>) {
        if let Some(entry) = self.images.get_mut(slot) {
            *entry = image.cloned();
        }
    }

    fn save_state(&mut self, path: &Path) -> Result<()> {
        self.require_game("save_state")?;
        let state = HeadlessState {
            core: self.core.clone().unwrap_or_default(),
            game: self.game.clone().unwrap_or_default(),
            frames: self.frames,
            buttons: self.input.buttons,
        };
        let json = serde_json::to_vec_pretty(&state)?;
        fs::write(path, json).map_err(|e| RetroError::io_with_path(e, path))?;
        debug!("Saved state to {}", path.display());
        Ok(())
    }

    fn load_state(&mut self, path: &Path) -> Result<()> {
        self.require_game("load_state")?;
        let bytes = fs::read(path).map_err(|e| RetroError::io_with_path(e, path))?;
        let state: HeadlessState = serde_json::from_slice(&bytes)?;
        if Some(&state.game) != self.game.as_ref() {
            return Err(RetroError::engine(
                "load_state",
                format!("state belongs to {}", state.game.display()),
            ));
        }
        self.frames = state.frames;
        debug!("Loaded state from {}", path.display());
        Ok(())
    }

    fn save_screenshot(&mut self, path: &Path) -> Result<()> {
        self.require_game("save_screenshot")?;
        let (width, height) = self.screen;
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        let pixel = [
            channel(self.background.r),
            channel(self.background.g),
            channel(self.background.b),
        ];

        let mut file = fs::File::create(path).map_err(|e| RetroError::io_with_path(e, path))?;
        write!(file, "P6\n{} {}\n255\n", width, height)?;
        let row: Vec<u8> = pixel.iter().copied().cycle().take(width as usize * 3).collect();
        for _ in 0..height {
            file.write_all(&row)?;
        }
        debug!("Saved screenshot to {}", path.display());
        Ok(())
    }

    fn set_screen_size(&mut self, width: u32, height: u32) {
        self.screen = (width, height);
    }

    fn set_vsync(&mut self, enabled: bool) -> Result<()> {
        self.vsync = enabled;
        Ok(())
    }

    fn set_background_color(&mut self, color: BackgroundColor) {
        self.background = color;
    }

    fn check_saving_supported(&self) -> bool {
        self.game.is_some()
    }

    fn variables_changed(&mut self) {
        self.variables_changed += 1;
    }

    fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn loaded_engine(dir: &TempDir) -> HeadlessEngine {
        let core = dir.path().join("core.so");
        let game = dir.path().join("game.rom");
        fs::write(&core, b"core").unwrap();
        fs::write(&game, b"game").unwrap();

        let mut engine = HeadlessEngine::new(42, BackgroundColor::default());
        engine.core_load(&core).unwrap();
        engine.game_load(&game).unwrap();
        engine
    }

    #[test]
    fn test_variable_declaration_parsing() {
        let event = EngineEvent::variable("core_region", "Region; Auto|NTSC|PAL").unwrap();
        assert_eq!(
            event,
            EngineEvent::VariableDeclared {
                key: "core_region".into(),
                description: "Region".into(),
                options: vec!["Auto".into(), "NTSC".into(), "PAL".into()],
            }
        );

        assert!(EngineEvent::variable("k", "no separator").is_err());
        assert!(EngineEvent::variable("k", "Desc; a||b").is_err());
    }

    #[test]
    fn test_load_requires_existing_files() {
        let dir = TempDir::new().unwrap();
        let mut engine = HeadlessEngine::new(1, BackgroundColor::default());

        let err = engine.core_load(&dir.path().join("missing.so")).unwrap_err();
        assert!(matches!(err, RetroError::Engine { .. }));

        // Game before core
        let game = dir.path().join("game.rom");
        fs::write(&game, b"game").unwrap();
        assert!(engine.game_load(&game).is_err());
        assert!(!engine.check_saving_supported());
    }

    #[test]
    fn test_game_load_reports_render_size() {
        let dir = TempDir::new().unwrap();
        let mut engine = loaded_engine(&dir);

        let (width, height) = HEADLESS_RENDER_SIZE;
        assert_eq!(
            engine.drain_events(),
            vec![EngineEvent::RenderSizeChanged { width, height }]
        );
        assert!(engine.drain_events().is_empty());
        assert!(engine.check_saving_supported());
    }

    #[test]
    fn test_declared_variables_emitted_on_core_load() {
        let dir = TempDir::new().unwrap();
        let core = dir.path().join("core.so");
        fs::write(&core, b"core").unwrap();

        let mut engine = HeadlessEngine::new(1, BackgroundColor::default())
            .with_variable("frameskip", "Frame skip; 0|1|2");
        engine.core_load(&core).unwrap();

        let events = engine.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            EngineEvent::VariableDeclared { key, options, .. } if key == "frameskip" && options.len() == 3
        ));
    }

    #[test]
    fn test_state_roundtrip_restores_frames() {
        let dir = TempDir::new().unwrap();
        let mut engine = loaded_engine(&dir);
        let state = dir.path().join("slot1.state");

        for _ in 0..5 {
            engine.step();
        }
        engine.save_state(&state).unwrap();
        engine.step();
        assert_eq!(engine.frames(), 6);

        engine.load_state(&state).unwrap();
        assert_eq!(engine.frames(), 5);
    }

    #[test]
    fn test_frame_pacing_limits_step_rate() {
        let dir = TempDir::new().unwrap();
        let mut engine = loaded_engine(&dir).with_frame_time(Duration::from_millis(20));

        let start = Instant::now();
        for _ in 0..4 {
            engine.step();
        }
        // The first step runs immediately, the next three wait a frame each
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert_eq!(engine.frames(), 4);
    }

    #[test]
    fn test_screenshot_is_ppm_of_screen_size() {
        let dir = TempDir::new().unwrap();
        let mut engine = loaded_engine(&dir);
        engine.set_screen_size(4, 2);
        engine.set_background_color(BackgroundColor::new(1.0, 0.0, 0.0));

        let path = dir.path().join("shot.ppm");
        engine.save_screenshot(&path).unwrap();

        let bytes = fs::read(&path).unwrap();
        let header = b"P6\n4 2\n255\n";
        assert!(bytes.starts_with(header));
        assert_eq!(bytes.len(), header.len() + 4 * 2 * 3);
        assert_eq!(&bytes[header.len()..header.len() + 3], &[255, 0, 0]);
    }
}
