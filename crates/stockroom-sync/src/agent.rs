//! # Sync Agent
//!
//! Background task that decides when the [`SyncManager`] drains.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │   Repositories ──► ChangeFeed ──┐                                       │
//! │   (enqueue event)               │                                       │
//! │                                 ▼                                       │
//! │   App lifecycle ──► SyncAgentHandle ──► ┌─────────────────────────┐    │
//! │   (foreground /        notify()         │       SyncAgent         │    │
//! │    background)         sync_now()       │                         │    │
//! │                        set_mode()       │  select! {              │    │
//! │                        shutdown() ────► │    shutdown,            │    │
//! │                                         │    command,             │    │
//! │                                         │    change event,        │    │
//! │                                         │  }                      │    │
//! │                                         │  collect buffered       │    │
//! │                                         │  triggers, then ONE     │    │
//! │                                         │  drain (+ purge)        │    │
//! │                                         └───────────┬─────────────┘    │
//! │                                                     ▼                   │
//! │                                              SyncManager::drain()      │
//! │                                                                         │
//! │  There is no timer: an operation that failed is retried on the next   │
//! │  trigger, and an exhausted one only leaves the queue through purge.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Drains run inline in the agent loop, so a shutdown request received
//! mid-drain is handled once that drain has finished.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use stockroom_db::{ChangeEvent, Database};

use crate::config::{SyncConfig, SyncMode, SyncSettings};
use crate::error::{SyncError, SyncResult};
use crate::manager::{DrainReport, SyncManager, SyncState};
use crate::remote::RemoteStore;

/// Commands buffered between the handle and the agent loop.
const COMMAND_BUFFER: usize = 32;

// =============================================================================
// Triggers
// =============================================================================

/// Application lifecycle transitions reported by the host app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The app became visible again.
    Foreground,
    /// The app was sent to the background.
    Background,
}

enum AgentCommand {
    SyncNow(oneshot::Sender<SyncResult<DrainReport>>),
    Lifecycle(LifecycleEvent),
    SetMode(SyncMode),
}

/// Work accumulated from every trigger seen since the last drain.
#[derive(Default)]
struct Work {
    drain: bool,
    purge: bool,
    waiters: Vec<oneshot::Sender<SyncResult<DrainReport>>>,
}

impl Work {
    fn is_empty(&self) -> bool {
        !self.drain && !self.purge && self.waiters.is_empty()
    }
}

// =============================================================================
// Sync Agent
// =============================================================================

/// Event loop driving a [`SyncManager`].
pub struct SyncAgent {
    manager: Arc<SyncManager>,
    settings: SyncSettings,
    commands: mpsc::Receiver<AgentCommand>,
    changes: broadcast::Receiver<ChangeEvent>,
    shutdown: mpsc::Receiver<()>,
}

impl SyncAgent {
    /// Spawns the agent on the current runtime.
    pub fn spawn(manager: Arc<SyncManager>, settings: SyncSettings) -> SyncAgentHandle {
        let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (shutdown_tx, shutdown) = mpsc::channel(1);

        // Subscribe before spawning so nothing enqueued from here on is missed.
        let changes = manager.database().changes().subscribe();

        info!(
            mode = %settings.mode,
            max_retries = manager.max_retries(),
            "Starting sync agent"
        );

        let agent = SyncAgent {
            manager: manager.clone(),
            settings,
            commands,
            changes,
            shutdown,
        };
        let task = tokio::spawn(agent.run());

        SyncAgentHandle {
            command_tx,
            shutdown_tx,
            manager,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Builds a manager from `config` and spawns an agent for it.
    pub fn start(
        config: &SyncConfig,
        db: Database,
        remote: Arc<dyn RemoteStore>,
    ) -> SyncResult<SyncAgentHandle> {
        config.validate()?;
        let manager = Arc::new(SyncManager::from_config(db, remote, config));
        Ok(Self::spawn(manager, config.sync.clone()))
    }

    async fn run(mut self) {
        loop {
            let mut work = Work::default();

            tokio::select! {
                biased;

                _ = self.shutdown.recv() => {
                    info!("Sync agent received shutdown");
                    break;
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command, &mut work),
                    None => {
                        debug!("All agent handles dropped");
                        break;
                    }
                },

                event = self.changes.recv() => match event {
                    Ok(event) => self.on_change(event, &mut work),
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "Change feed lagged, treating as enqueue");
                        self.on_enqueue(&mut work);
                    }
                    Err(RecvError::Closed) => {
                        warn!("Change feed closed, stopping sync agent");
                        break;
                    }
                },
            }

            self.collect_buffered(&mut work);
            while !work.is_empty() {
                self.perform(std::mem::take(&mut work)).await;

                if self.shutdown.try_recv().is_ok() {
                    info!("Sync agent received shutdown after drain");
                    return;
                }
                // Triggers that piled up during the drain become one follow-up.
                self.collect_buffered(&mut work);
            }
        }

        info!("Sync agent stopped");
    }

    // =========================================================================
    // Trigger Handling
    // =========================================================================

    fn on_command(&mut self, command: AgentCommand, work: &mut Work) {
        match command {
            AgentCommand::SyncNow(reply) => {
                if self.settings.mode.is_sync_enabled() {
                    work.waiters.push(reply);
                } else {
                    let _ = reply.send(Err(SyncError::SyncDisabled));
                }
            }

            AgentCommand::Lifecycle(LifecycleEvent::Foreground) => {
                debug!("App entered foreground");
                if self.settings.mode.is_automatic() && self.settings.drain_on_foreground {
                    work.drain = true;
                }
            }

            AgentCommand::Lifecycle(LifecycleEvent::Background) => {
                debug!("App entered background");
                if self.settings.mode.is_automatic() {
                    work.drain = true;
                }
                if self.settings.purge_on_background {
                    work.purge = true;
                }
            }

            AgentCommand::SetMode(mode) => {
                if mode != self.settings.mode {
                    info!(from = %self.settings.mode, to = %mode, "Sync mode changed");
                    self.settings.mode = mode;
                    // Catch up on whatever queued while triggers were ignored.
                    if mode.is_automatic() {
                        work.drain = true;
                    }
                }
            }
        }
    }

    fn on_change(&self, event: ChangeEvent, work: &mut Work) {
        if event.is_enqueue() {
            self.on_enqueue(work);
        }
    }

    fn on_enqueue(&self, work: &mut Work) {
        if self.settings.mode.is_automatic() && self.settings.drain_on_enqueue {
            work.drain = true;
        }
    }

    /// Folds every already-queued command and change event into `work`.
    fn collect_buffered(&mut self, work: &mut Work) {
        while let Ok(command) = self.commands.try_recv() {
            self.on_command(command, work);
        }

        loop {
            match self.changes.try_recv() {
                Ok(event) => self.on_change(event, work),
                Err(TryRecvError::Lagged(_)) => self.on_enqueue(work),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    // =========================================================================
    // Execution
    // =========================================================================

    async fn perform(&self, work: Work) {
        if work.drain || !work.waiters.is_empty() {
            let result = self.manager.drain().await;

            match &result {
                Ok(report) if report.failed > 0 => {
                    debug!(failed = report.failed, "Drain left failed operations queued")
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Drain failed"),
            }

            for waiter in work.waiters {
                let reply = match &result {
                    Ok(report) => Ok(*report),
                    Err(e) => Err(SyncError::DrainFailed(e.to_string())),
                };
                let _ = waiter.send(reply);
            }
        }

        if work.purge {
            if let Err(e) = self.manager.purge_failed().await {
                error!(error = %e, "Purge of exhausted operations failed");
            }
        }
    }
}

// =============================================================================
// Agent Handle (for external control)
// =============================================================================

/// Handle for controlling a running [`SyncAgent`].
///
/// Cheap to clone; every clone talks to the same agent.
#[derive(Clone)]
pub struct SyncAgentHandle {
    command_tx: mpsc::Sender<AgentCommand>,
    shutdown_tx: mpsc::Sender<()>,
    manager: Arc<SyncManager>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SyncAgentHandle {
    /// Drains now and waits for the result.
    ///
    /// Fails with [`SyncError::SyncDisabled`] in offline mode.
    pub async fn sync_now(&self) -> SyncResult<DrainReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(AgentCommand::SyncNow(reply_tx)).await?;
        reply_rx.await.map_err(|_| SyncError::ShuttingDown)?
    }

    /// Reports an application lifecycle transition.
    pub async fn notify(&self, event: LifecycleEvent) -> SyncResult<()> {
        self.send(AgentCommand::Lifecycle(event)).await
    }

    /// Switches the sync mode at runtime.
    pub async fn set_mode(&self, mode: SyncMode) -> SyncResult<()> {
        self.send(AgentCommand::SetMode(mode)).await
    }

    /// Current manager state.
    pub fn state(&self) -> SyncState {
        self.manager.state()
    }

    /// Subscribes to manager state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.manager.subscribe()
    }

    pub fn manager(&self) -> &Arc<SyncManager> {
        &self.manager
    }

    /// Stops the agent, letting an in-flight drain finish first.
    pub async fn shutdown(&self) -> SyncResult<()> {
        let _ = self.shutdown_tx.send(()).await;

        if let Some(task) = self.task.lock().await.take() {
            task.await
                .map_err(|e| SyncError::ChannelError(format!("agent task failed: {e}")))?;
        }
        Ok(())
    }

    async fn send(&self, command: AgentCommand) -> SyncResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }
}

impl std::fmt::Debug for SyncAgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncAgentHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
