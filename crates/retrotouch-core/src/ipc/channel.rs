//! Blocking channel used by the single-threaded runner loop.
//!
//! The runner alternates between polling the channel and stepping the engine.
//! [`Channel::select`] waits up to a timeout for the read pipe to become
//! readable, then reads exactly one frame.

use super::protocol::{decode_call, read_frame, FrameWriter, RpcCall};
use super::Message;
use crate::{Result, RetroError};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::fs::File;
use std::os::fd::{AsFd, OwnedFd};
use std::time::Duration;
use tracing::{trace, warn};

/// Bidirectional channel over two one-directional pipes.
#[derive(Debug)]
pub struct Channel {
    reader: File,
    writer: FrameWriter<File>,
}

impl Channel {
    /// Wrap the read and write ends of the two pipes.
    pub fn new(read: OwnedFd, write: OwnedFd) -> Self {
        Self {
            reader: File::from(read),
            writer: FrameWriter::new(File::from(write)),
        }
    }

    /// Send a typed message to the peer.
    pub fn send<M: Message>(&mut self, message: &M) -> Result<()> {
        trace!("-> {}", message.method());
        self.writer.send(message)
    }

    /// Wait up to `timeout` for one frame and decode it.
    ///
    /// Returns `Ok(None)` when nothing arrived in time. A hang-up or error on the
    /// descriptor falls through to the read, which reports peer loss.
    pub fn select(&mut self, timeout: Duration) -> Result<Option<RpcCall>> {
        if !self.wait_readable(timeout)? {
            return Ok(None);
        }

        let payload = read_frame(&mut self.reader)?;
        let call = decode_call(&payload)?;
        trace!("<- {}", call.method);
        Ok(Some(call))
    }

    /// Dispatch every frame that arrives within `timeout`, then keep draining
    /// while more frames are immediately available.
    ///
    /// Handler failures are logged and do not stop the drain; only peer loss is
    /// returned. Yields the number of calls handled.
    pub fn drain<F>(&mut self, timeout: Duration, mut handler: F) -> Result<usize>
    where
        F: FnMut(&mut Self, RpcCall) -> Result<()>,
    {
        let mut handled = 0;
        let mut wait = timeout;
        while let Some(call) = self.select(wait)? {
            let method = call.method.clone();
            if let Err(e) = handler(self, call) {
                if e.is_peer_loss() {
                    return Err(e);
                }
                warn!("RPC call {} failed: {}", method, e);
            }
            handled += 1;
            wait = Duration::ZERO;
        }
        Ok(handled)
    }

    fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        let mut fds = [PollFd::new(self.reader.as_fd(), PollFlags::POLLIN)];

        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(0) => Ok(false),
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                Ok(revents.intersects(
                    PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR,
                ))
            }
            Err(Errno::EINTR) => Ok(false),
            Err(Errno::EBADF) | Err(Errno::EINVAL) => Err(RetroError::PeerLost {
                reason: "read descriptor is invalid".to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
