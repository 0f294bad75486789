//! Process-level tests spawning the real runner binary.

use retrotouch_core::platform::is_process_alive;
use retrotouch_core::{Frontend, LaunchConfig, SessionState, Supervisor};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const RUNNER: &str = env!("CARGO_BIN_EXE_retrotouch-runner");

#[derive(Debug, Default)]
struct Recorder {
    ready: Vec<u64>,
    crashed: u32,
    paused: Vec<bool>,
    render_sizes: Vec<(u32, u32)>,
    saved: Vec<PathBuf>,
}

impl Frontend for Recorder {
    fn on_core_ready(&mut self, window_id: u64) {
        self.ready.push(window_id);
    }

    fn on_core_crashed(&mut self) {
        self.crashed += 1;
    }

    fn on_render_size_changed(&mut self, width: u32, height: u32) {
        self.render_sizes.push((width, height));
    }

    fn on_playpause_changed(&mut self, paused: bool) {
        self.paused.push(paused);
    }

    fn on_state_saved(&mut self, path: &Path) {
        self.saved.push(path.to_path_buf());
    }
}

/// Temp dir holding a fake core and game.
fn create_test_env() -> (TempDir, PathBuf, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let core = temp_dir.path().join("core.so");
    let game = temp_dir.path().join("game.rom");
    std::fs::write(&core, b"core").unwrap();
    std::fs::write(&game, b"game").unwrap();
    (temp_dir, core, game)
}

fn supervisor() -> Supervisor {
    let config = LaunchConfig::new(RUNNER)
        .with_window_id(31)
        .with_ping_interval(Duration::from_millis(50));
    Supervisor::with_command_launcher(config)
}

async fn pump_until(
    supervisor: &mut Supervisor,
    recorder: &mut Recorder,
    done: impl Fn(&Supervisor, &Recorder) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done(supervisor, recorder) {
        assert!(Instant::now() < deadline, "timed out: {:?}", recorder);
        supervisor.pump(recorder).await;
    }
}

#[tokio::test]
async fn test_runner_boots_and_follows_requests() {
    let (temp_dir, core, game) = create_test_env();
    let mut supervisor = supervisor();
    let mut recorder = Recorder::default();

    supervisor.start(&core, &game).unwrap();
    let pid = supervisor.process_id().expect("runner has a pid");
    assert!(is_process_alive(pid));
    assert!(supervisor.process_alive());

    pump_until(&mut supervisor, &mut recorder, |_, r| r.paused == [false]).await;
    assert_eq!(recorder.ready, vec![31]);
    assert_eq!(recorder.render_sizes, vec![(320, 240)]);
    assert!(supervisor.saving_supported());

    supervisor.set_paused(true).unwrap();
    pump_until(&mut supervisor, &mut recorder, |s, _| s.paused()).await;
    assert_eq!(recorder.paused, vec![false, true]);

    let state = temp_dir.path().join("slot0.state");
    supervisor.save_state(&state).unwrap();
    pump_until(&mut supervisor, &mut recorder, |_, r| !r.saved.is_empty()).await;
    assert_eq!(recorder.saved, vec![state.clone()]);
    let saved = std::fs::read_to_string(&state).unwrap();
    assert!(saved.contains("game.rom"));

    supervisor.destroy();
    assert_eq!(supervisor.state(), SessionState::Closed);
    assert!(!supervisor.process_alive());
    assert_eq!(recorder.crashed, 0);
}

#[tokio::test]
async fn test_killed_runner_is_reported_as_crash() {
    let (_temp_dir, core, game) = create_test_env();
    let mut supervisor = supervisor();
    let mut recorder = Recorder::default();

    supervisor.start(&core, &game).unwrap();
    let region = supervisor.region_path().unwrap();
    pump_until(&mut supervisor, &mut recorder, |_, r| !r.ready.is_empty()).await;

    let pid = supervisor.process_id().unwrap();
    let status = Command::new("kill")
        .args(["-KILL", &pid.to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    pump_until(&mut supervisor, &mut recorder, |s, _| {
        s.state() == SessionState::Crashed
    })
    .await;
    assert_eq!(recorder.crashed, 1);
    assert!(!region.exists());
    assert!(!supervisor.pump(&mut recorder).await);
}

#[tokio::test]
async fn test_missing_core_ends_session() {
    let (temp_dir, _core, game) = create_test_env();
    let mut supervisor = supervisor();
    let mut recorder = Recorder::default();

    supervisor
        .start(temp_dir.path().join("missing.so"), &game)
        .unwrap();

    pump_until(&mut supervisor, &mut recorder, |s, _| {
        s.state() == SessionState::Crashed
    })
    .await;
    // The window is always announced before loading
    assert_eq!(recorder.ready, vec![31]);
    assert_eq!(recorder.crashed, 1);
}

#[test]
fn test_runner_requires_region_path() {
    let output = Command::new(RUNNER)
        .args(["core.so", "game.rom"])
        .env_remove("RT_RUNNER_SHM_FILENAME")
        .output()
        .unwrap();
    assert!(!output.status.success());
}
