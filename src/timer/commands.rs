use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot, watch};

use crate::models::{Session, SessionType};

use super::controller::{
    Collaborators, Command, FocusLoop, FocusSnapshot, OrchestratorOptions, TimerSnapshot,
};

/// Handle to the focus loop. Cloning is cheap; every clone talks to the same
/// loop, which stops once the last handle is dropped.
#[derive(Clone)]
pub struct FocusOrchestrator {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<TimerSnapshot>,
}

impl FocusOrchestrator {
    /// Spawns the focus loop on the current tokio runtime.
    pub fn spawn(collaborators: Collaborators, options: OrchestratorOptions) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshots_tx, snapshots_rx) = watch::channel(TimerSnapshot::default());

        let focus_loop = FocusLoop::new(collaborators, options, commands_rx, snapshots_tx);
        tokio::spawn(focus_loop.run());

        Self {
            commands: commands_tx,
            snapshots: snapshots_rx,
        }
    }

    /// Starts a session of `session_type`, work when `None`. A session that
    /// is still running is aborted first.
    pub async fn start_timer(&self, session_type: Option<SessionType>) -> Result<TimerSnapshot> {
        let session_type = session_type.unwrap_or_default();
        self.request(|reply| Command::Start {
            session_type,
            reply,
        })
        .await?
    }

    pub async fn pause_timer(&self) -> Result<TimerSnapshot> {
        self.request(|reply| Command::Pause { reply }).await
    }

    pub async fn resume_timer(&self) -> Result<TimerSnapshot> {
        self.request(|reply| Command::Resume { reply }).await
    }

    /// Completes the current session early and starts the next one in the
    /// cycle. Returns the finalized session, if one was recorded.
    pub async fn skip_timer(&self) -> Result<Option<Session>> {
        self.request(|reply| Command::Skip { reply }).await?
    }

    /// Aborts the current session with `reason` and returns the timer to idle.
    pub async fn stop_timer(&self, reason: Option<String>) -> Result<Option<Session>> {
        self.request(|reply| Command::Stop { reason, reply }).await
    }

    pub async fn snapshot(&self) -> Result<FocusSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn sessions(&self) -> Result<Vec<Session>> {
        Ok(self.snapshot().await?.sessions)
    }

    /// Receives a new snapshot after every observable state change.
    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.snapshots.clone()
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .map_err(|_| anyhow!("focus loop is no longer running"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("focus loop stopped before answering"))
    }
}
