//! Action lifecycle model and cooperative cancellation tokens.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

/// Action identifier, unique per runner lifetime.
pub type ActionId = Uuid;

/// Lifecycle status of a submitted action.
///
/// Transitions are monotonic along `Pending -> Running -> {Complete |
/// Aborted | Failed}`; an action never re-enters `Running` after reaching a
/// terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Submitted but not yet started.
    Pending,
    /// Currently executing.
    Running,
    /// Execution finished successfully.
    Complete,
    /// The abort signal was observed before completion.
    Aborted,
    /// Execution failed; see `Action::error`.
    Failed,
}

impl ActionStatus {
    /// Whether this status ends the action's lifecycle.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Aborted | Self::Failed)
    }
}

/// One submitted, trackable unit of command execution.
#[derive(Debug, Clone, Serialize)]
pub struct Action {
    /// Unique identifier.
    pub id: ActionId,
    /// Shell command text.
    pub command: String,
    /// Working directory the command runs in.
    pub cwd: PathBuf,
    /// Current lifecycle status.
    pub status: ActionStatus,
    /// Whether execution ran to successful completion.
    pub executed: bool,
    /// Error text captured on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Action {
    /// Create a freshly submitted action in `Pending`.
    #[must_use]
    pub fn new(id: ActionId, command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            id,
            command: command.into(),
            cwd: cwd.into(),
            status: ActionStatus::Pending,
            executed: false,
            error: None,
        }
    }
}

/// Create a linked abort handle/signal pair for one action.
#[must_use]
pub fn abort_channel() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx }, AbortSignal { rx })
}

/// Raises the abort flag for one action. Held by the runner.
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Raise the abort flag. Idempotent.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether the flag has been raised.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Cooperative cancellation token observed by the execution path.
///
/// Cancellation is not preemptive: executors check the token at their yield
/// points and unwind on their own schedule.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// Whether the abort flag has been raised.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the abort flag is raised.
    ///
    /// Pends forever when the handle is dropped without aborting, which is
    /// what `select!` arms want.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
