//! Resources bound to one running emulation process.

use super::launcher::{CoreLauncher, CoreProcess, LaunchConfig, SpawnRequest};
use crate::config::SupervisorConfig;
use crate::ipc::{spawn_event_reader, FrameWriter, Inbound, Message, Request};
use crate::platform::pipe_pair;
use crate::region::SharedRegion;
use crate::{Result, RetroError};
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Child process, our pipe ends, the region and the receive task.
///
/// Dropped as a unit on close, new game or crash.
pub(crate) struct ProcessLink {
    process: Box<dyn CoreProcess>,
    writer: Option<FrameWriter<File>>,
    pub(crate) region: SharedRegion,
    reader: JoinHandle<()>,
    pub(crate) inbound: mpsc::Receiver<Inbound>,
    pub(crate) ping: Interval,
}

impl ProcessLink {
    /// Create the region and pipes, launch the runner and start receiving.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn open(
        config: &LaunchConfig,
        launcher: &dyn CoreLauncher,
        core: &Path,
        game: &Path,
    ) -> Result<Self> {
        let region = SharedRegion::create(config.region_size)?;
        let (runner_read, our_write) = pipe_pair()?;
        let (our_read, runner_write) = pipe_pair()?;

        let process = launcher.launch(SpawnRequest {
            config,
            core,
            game,
            read_fd: runner_read,
            write_fd: runner_write,
            region_path: region.path(),
        })?;

        let (tx, inbound) = mpsc::channel(SupervisorConfig::EVENT_QUEUE_CAPACITY);
        let reader = spawn_event_reader(our_read, tx)?;

        let mut ping = interval_at(Instant::now() + config.ping_interval, config.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!("Process link open, pid {:?}", process.id());
        Ok(Self {
            process,
            writer: Some(FrameWriter::new(File::from(our_write))),
            region,
            reader,
            inbound,
            ping,
        })
    }

    pub(crate) fn send(&mut self, request: &Request) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(RetroError::SessionClosed)?;
        trace!("-> {}", request.method());
        writer.send(request)
    }

    pub(crate) fn process_id(&self) -> Option<u32> {
        self.process.id()
    }

    pub(crate) fn process_alive(&mut self) -> bool {
        self.process.is_alive()
    }

    /// Tear everything down. Never fails; problems are logged.
    ///
    /// Inside a tokio runtime the process is stopped and reaped on the
    /// blocking pool, so the caller never waits out `kill_timeout`. The region
    /// is always released before returning.
    pub(crate) fn close(self, kill_timeout: Duration) {
        let Self {
            mut process,
            writer,
            region,
            reader,
            ..
        } = self;

        reader.abort();
        // EOF on its read pipe lets the runner leave its loop on its own
        drop(writer);

        if let Err(e) = region.close() {
            warn!("Failed to release shared region: {}", e);
        }

        let mut stop = move || {
            if let Err(e) = process.terminate(kill_timeout) {
                warn!("Failed to terminate runner: {}", e);
            }
        };
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(stop);
            }
            Err(_) => stop(),
        }
        debug!("Process link closed");
    }
}
