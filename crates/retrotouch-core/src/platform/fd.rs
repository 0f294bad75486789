//! Pipe and descriptor helpers.
//!
//! Every descriptor this crate creates starts out close-on-exec. The launcher
//! clears the flag on the runner's two pipe ends inside the forked child only.

use crate::{Result, RetroError};
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Create a one-directional pipe, returning `(read, write)`.
///
/// Both ends are close-on-exec.
pub fn pipe_pair() -> Result<(OwnedFd, OwnedFd)> {
    let (read, write) = nix::unistd::pipe()?;
    set_inheritable(&read, false)?;
    set_inheritable(&write, false)?;
    Ok((read, write))
}

/// Toggle whether a descriptor survives `exec` into a child process.
pub fn set_inheritable(fd: &impl AsRawFd, inheritable: bool) -> Result<()> {
    let flags = if inheritable {
        FdFlag::empty()
    } else {
        FdFlag::FD_CLOEXEC
    };
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(flags))?;
    Ok(())
}

/// Take ownership of a descriptor number inherited from the parent.
///
/// The descriptor is validated first and made close-on-exec afterwards.
pub fn adopt_fd(raw: RawFd, name: &str) -> Result<OwnedFd> {
    if raw < 0 {
        return Err(RetroError::InvalidEnv {
            name: name.to_string(),
            message: format!("negative descriptor {}", raw),
        });
    }

    fcntl(raw, FcntlArg::F_GETFD).map_err(|e| RetroError::InvalidEnv {
        name: name.to_string(),
        message: format!("descriptor {} is not open: {}", raw, e),
    })?;

    // SAFETY: `raw` was just verified to be an open descriptor, and the spawn
    // contract hands it to this process exclusively; nothing else owns it.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    set_inheritable(&fd, false)?;
    Ok(fd)
}
