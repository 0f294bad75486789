//! Child process liveness and termination.

use crate::error::Result;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::Child;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Check if a process with the given PID is alive.
///
/// Uses `kill(pid, 0)`: signal 0 is never delivered, only permission and
/// existence are checked. Zombies still count as alive until reaped.
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs only the existence/permission check.
    unsafe { libc::kill(raw, 0) == 0 }
}

/// Terminate a child gracefully, then forcefully if needed, and reap it.
///
/// Sends SIGTERM, polls for exit for up to `timeout`, then SIGKILLs.
///
/// # Returns
/// `true` if the child exited on SIGTERM (or had already exited), `false` if
/// it had to be killed.
pub fn terminate_child(child: &mut Child, timeout: Duration) -> Result<bool> {
    if let Some(status) = child.try_wait()? {
        debug!("Process {} already exited: {}", child.id(), status);
        return Ok(true);
    }

    let pid = Pid::from_raw(child.id() as i32);

    debug!("Sending SIGTERM to process {}", child.id());
    if let Err(e) = kill(pid, Signal::SIGTERM) {
        if e == nix::errno::Errno::ESRCH {
            let _ = child.try_wait();
            return Ok(true);
        }
        warn!("Failed to send SIGTERM to {}: {}", child.id(), e);
    }

    let wait_interval = Duration::from_millis(10);
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait()? {
            debug!("Process {} terminated gracefully: {}", child.id(), status);
            return Ok(true);
        }
        sleep(wait_interval);
    }

    debug!("Process {} still running, sending SIGKILL", child.id());
    if let Err(e) = child.kill() {
        // InvalidInput means it exited between the last poll and now
        if e.kind() != std::io::ErrorKind::InvalidInput {
            return Err(e.into());
        }
    }

    // Reap the zombie so it leaves the process table
    let status = child.wait()?;
    debug!("Reaped process {}: {}", child.id(), status);
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_is_process_alive_self() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        // A very high PID should not exist
        assert!(!is_process_alive(4_000_000_000));
    }

    #[test]
    fn test_terminate_running_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        assert!(is_process_alive(pid));

        let graceful = terminate_child(&mut child, Duration::from_secs(2)).unwrap();
        assert!(graceful);
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_terminate_exited_child() {
        let mut child = Command::new("true").spawn().unwrap();
        child.wait().unwrap();
        assert!(terminate_child(&mut child, Duration::from_millis(10)).unwrap());
    }
}
