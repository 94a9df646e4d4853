//! Engine wiring
//!
//! Creates the event pipe, then starts the reader, supervisor and arbiter
//! tasks around one shared cancellation token.

use crate::arbiter::{Arbiter, ArbiterHandle, ArbiterStatus};
use crate::channel::{ensure_fifo, EventReader};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::publisher::StatePublisher;
use crate::supervisor::Supervisor;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Engine;

impl Engine {
    /// Start all engine tasks
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if the event pipe cannot be created; the engine does not start
    /// without a place for the hook to write to.
    pub fn start(config: EngineConfig) -> Result<EngineHandle> {
        ensure_fifo(&config.reader.pipe_path)?;

        let root = CancellationToken::new();
        // The supervisor outlives the arbiter so the arbiter can stop the player
        let supervisor_cancel = CancellationToken::new();

        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (supervisor, supervisor_task) =
            Supervisor::spawn(config.player, config.supervisor, report_tx, supervisor_cancel.clone());

        let (event_tx, event_rx) = mpsc::channel(config.queue_capacity);
        let reader_task = EventReader::new(config.reader, event_tx, root.child_token()).spawn();

        let (arbiter, arbiter_task) = Arbiter::spawn(
            config.arbiter,
            supervisor,
            config.probe,
            StatePublisher::new(config.state_path),
            event_rx,
            report_rx,
            root.child_token(),
        );

        info!("Engine started");
        Ok(EngineHandle {
            cancel: root,
            supervisor_cancel,
            arbiter,
            reader_task,
            arbiter_task,
            supervisor_task,
        })
    }
}

/// Running engine
pub struct EngineHandle {
    cancel: CancellationToken,
    supervisor_cancel: CancellationToken,
    arbiter: ArbiterHandle,
    reader_task: JoinHandle<()>,
    arbiter_task: JoinHandle<()>,
    supervisor_task: JoinHandle<()>,
}

impl EngineHandle {
    pub fn status(&self) -> ArbiterStatus {
        self.arbiter.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<ArbiterStatus> {
        self.arbiter.subscribe()
    }

    /// Explicit resume after the player was given up on
    pub async fn resume(&self) -> Result<()> {
        self.arbiter.resume().await
    }

    /// Stop everything and wait for the tasks to finish
    ///
    /// The arbiter stops the player and publishes `idle` before the
    /// supervisor task is told to exit.
    pub async fn shutdown(self) {
        info!("Engine shutting down");
        self.cancel.cancel();

        if let Err(e) = self.reader_task.await {
            warn!("Event reader task ended abnormally: {}", e);
        }
        if let Err(e) = self.arbiter_task.await {
            warn!("Arbiter task ended abnormally: {}", e);
        }

        self.supervisor_cancel.cancel();
        if let Err(e) = self.supervisor_task.await {
            warn!("Supervisor task ended abnormally: {}", e);
        }
        info!("Engine stopped");
    }
}
