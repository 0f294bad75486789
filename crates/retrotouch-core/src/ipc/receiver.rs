//! Event-driven receive loop used by the supervisor.
//!
//! A single tokio task owns the read pipe. After each completed frame it
//! immediately re-arms the next 4-byte read, so the UI thread never blocks on
//! the channel. Decoded events are queued for [`crate::Supervisor::pump`].

use super::protocol::{decode_call, read_frame_async};
use super::{Event, Message};
use crate::Result;
use std::os::fd::OwnedFd;
use tokio::net::unix::pipe;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Item produced by the receive loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(Event),
    /// The stream broke; no further items follow.
    PeerLost(String),
}

/// Spawn the receive loop on the current tokio runtime.
///
/// Must be called from within a tokio runtime. The loop ends after reporting
/// peer loss, or silently when the queue's receiver is dropped.
pub fn spawn_event_reader(read: OwnedFd, tx: mpsc::Sender<Inbound>) -> Result<JoinHandle<()>> {
    let mut receiver = pipe::Receiver::from_owned_fd(read)?;

    Ok(tokio::spawn(async move {
        loop {
            let call = match read_frame_async(&mut receiver).await {
                Ok(payload) => decode_call(&payload),
                Err(e) => Err(e),
            };

            let call = match call {
                Ok(call) => call,
                Err(e) => {
                    debug!("Event reader stopping: {}", e);
                    let _ = tx.send(Inbound::PeerLost(e.to_string())).await;
                    return;
                }
            };

            match Event::from_call(&call) {
                Ok(event) => {
                    if tx.send(Inbound::Event(event)).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!("Ignoring call from runner: {}", e),
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{FrameWriter, RpcCall};
    use crate::platform::pipe_pair;
    use std::fs::File;
    use std::io::Write;

    #[tokio::test]
    async fn test_events_are_forwarded_in_order() {
        let (read, write) = pipe_pair().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let _task = spawn_event_reader(read, tx).unwrap();

        let mut writer = FrameWriter::new(File::from(write));
        writer.send(&Event::WindowCreated { window_id: 9 }).unwrap();
        writer.send_call(&RpcCall::new("no_such_event")).unwrap();
        writer.send(&Event::PausedChanged(true)).unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Inbound::Event(Event::WindowCreated { window_id: 9 }))
        );
        assert_eq!(
            rx.recv().await,
            Some(Inbound::Event(Event::PausedChanged(true)))
        );
    }

    #[tokio::test]
    async fn test_closed_pipe_reports_peer_lost_once() {
        let (read, write) = pipe_pair().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let task = spawn_event_reader(read, tx).unwrap();

        drop(write);

        assert!(matches!(rx.recv().await, Some(Inbound::PeerLost(_))));
        // Sender is gone once the task ends
        assert_eq!(rx.recv().await, None);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_truncated_frame_reports_peer_lost() {
        let (read, write) = pipe_pair().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let _task = spawn_event_reader(read, tx).unwrap();

        let mut raw = File::from(write);
        raw.write_all(&64u32.to_le_bytes()).unwrap();
        raw.write_all(b"{\"method\"").unwrap();
        drop(raw);

        assert!(matches!(rx.recv().await, Some(Inbound::PeerLost(_))));
    }
}
