//! Single-flight action state machine.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use sandbox_core::{
    AbortHandle, AbortSignal, Action, ActionId, ActionStatus, Envelope, PeerSet, abort_channel,
};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::executor::{ExecOutcome, Executor, ExecutorError};

/// Action runner error.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("action runner is already running")]
    AlreadyRunning,
    #[error("unknown action {0}")]
    UnknownAction(ActionId),
    #[error("action {0} already left pending")]
    AlreadyStarted(ActionId),
    #[error("command execution failed: {0}")]
    ExecutionFailed(String),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

struct ActionEntry {
    action: Action,
    abort: AbortHandle,
    signal: AbortSignal,
}

/// Serialized command execution: one action in flight at a time.
///
/// The runner is a strict single-flight serializer — a `run` while another
/// action is in flight fails fast rather than queueing. Callers wanting a
/// queue submit several actions and run them after each completion event.
///
/// `running == true` exactly when `current_action()` is `Some`; the
/// invariant holds by construction because both are one field.
pub struct ActionRunner {
    executor: Arc<dyn Executor>,
    actions: Mutex<HashMap<ActionId, ActionEntry>>,
    current: Arc<Mutex<Option<ActionId>>>,
    peers: Arc<PeerSet>,
}

impl ActionRunner {
    /// Create a runner over the given execution backend.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            actions: Mutex::new(HashMap::new()),
            current: Arc::new(Mutex::new(None)),
            peers: Arc::new(PeerSet::new()),
        }
    }

    /// Peers receiving `command/*` broadcasts.
    #[must_use]
    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    /// Create a `Pending` action and return its id immediately.
    pub fn submit(&self, command: impl Into<String>, cwd: impl Into<PathBuf>) -> ActionId {
        let id = Uuid::new_v4();
        let (abort, signal) = abort_channel();
        let action = Action::new(id, command, cwd);
        tracing::debug!(action = %id, command = %action.command, "action submitted");
        self.actions.lock().unwrap().insert(
            id,
            ActionEntry {
                action,
                abort,
                signal,
            },
        );
        id
    }

    /// Snapshot of one action's current state.
    #[must_use]
    pub fn action(&self, id: ActionId) -> Option<Action> {
        self.actions
            .lock()
            .unwrap()
            .get(&id)
            .map(|entry| entry.action.clone())
    }

    /// Id of the in-flight action, if any.
    #[must_use]
    pub fn current_action(&self) -> Option<ActionId> {
        *self.current.lock().unwrap()
    }

    /// Whether an action is in flight.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.current_action().is_some()
    }

    /// Raise the abort signal for the in-flight action.
    ///
    /// Cooperative: the execution path observes the signal and finishes
    /// `Aborted`. Returns whether a signal was raised.
    pub fn abort(&self, id: ActionId) -> bool {
        if self.current_action() != Some(id) {
            return false;
        }
        match self.actions.lock().unwrap().get(&id) {
            Some(entry) => {
                tracing::info!(action = %id, "abort requested");
                entry.abort.abort();
                true
            }
            None => false,
        }
    }

    /// Execute a previously submitted action and return its captured output.
    ///
    /// Streams `command/output` chunks to subscribed peers while running.
    ///
    /// # Errors
    /// `AlreadyRunning` when another action is in flight (the in-flight
    /// action is untouched); `ExecutionFailed` / `Executor` when the command
    /// fails, with the action left in `Failed`.
    pub async fn run(&self, id: ActionId) -> Result<String, RunnerError> {
        let (command, cwd, signal) = {
            let actions = self.actions.lock().unwrap();
            let entry = actions.get(&id).ok_or(RunnerError::UnknownAction(id))?;
            if entry.action.status != ActionStatus::Pending {
                return Err(RunnerError::AlreadyStarted(id));
            }
            (
                entry.action.command.clone(),
                entry.action.cwd.clone(),
                entry.signal.clone(),
            )
        };

        // claim the single-flight slot; the guard frees it on every exit
        // path, panics included
        let _guard = self.claim(id)?;

        self.set_status(id, ActionStatus::Running);
        self.peers.broadcast(&Envelope::command_start(&command));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (outcome, captured) = tokio::join!(
            self.executor.execute(&command, &cwd, signal, tx),
            async {
                let mut captured = String::new();
                while let Some(chunk) = rx.recv().await {
                    self.peers.broadcast(&Envelope::command_output(&chunk));
                    captured.push_str(&chunk);
                }
                captured
            }
        );

        match outcome {
            Ok(ExecOutcome::Exited(0)) => {
                self.finish(id, ActionStatus::Complete, None);
                self.peers.broadcast(&Envelope::command_exit(0));
                Ok(captured)
            }
            Ok(ExecOutcome::Exited(code)) => {
                let error = format!("command exited with status {code}");
                self.finish(id, ActionStatus::Failed, Some(error.clone()));
                self.peers.broadcast(&Envelope::command_error(&error));
                Err(RunnerError::ExecutionFailed(error))
            }
            Ok(ExecOutcome::Aborted) => {
                self.finish(id, ActionStatus::Aborted, None);
                self.peers.broadcast(&Envelope::command_error("command aborted"));
                Ok(captured)
            }
            Err(err) => {
                self.finish(id, ActionStatus::Failed, Some(err.to_string()));
                self.peers.broadcast(&Envelope::command_error(&err.to_string()));
                Err(err.into())
            }
        }
    }

    fn claim(&self, id: ActionId) -> Result<RunGuard, RunnerError> {
        let mut current = self.current.lock().unwrap();
        if current.is_some() {
            return Err(RunnerError::AlreadyRunning);
        }
        *current = Some(id);
        Ok(RunGuard {
            current: Arc::clone(&self.current),
        })
    }

    fn set_status(&self, id: ActionId, status: ActionStatus) {
        if let Some(entry) = self.actions.lock().unwrap().get_mut(&id) {
            entry.action.status = status;
        }
    }

    fn finish(&self, id: ActionId, status: ActionStatus, error: Option<String>) {
        debug_assert!(status.is_terminal());
        if let Some(entry) = self.actions.lock().unwrap().get_mut(&id) {
            entry.action.status = status;
            entry.action.executed = status == ActionStatus::Complete;
            entry.action.error = error;
        }
        tracing::debug!(action = %id, ?status, "action finished");
    }
}

/// Frees the single-flight slot when dropped.
struct RunGuard {
    current: Arc<Mutex<Option<ActionId>>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        *self.current.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, time::Duration};

    use async_trait::async_trait;
    use sandbox_core::{AbortSignal, Peer};
    use tokio::sync::Notify;

    use super::*;
    use crate::executor::OutputSink;

    /// Test double driven by a script instead of a process.
    struct ScriptedExecutor {
        chunks: Vec<&'static str>,
        exit_code: i32,
        /// Wait for this before finishing, when set.
        release: Option<Arc<Notify>>,
        /// Finish `Aborted` once the signal fires, when set.
        wait_for_abort: bool,
    }

    impl ScriptedExecutor {
        fn exiting(chunks: Vec<&'static str>, exit_code: i32) -> Self {
            Self {
                chunks,
                exit_code,
                release: None,
                wait_for_abort: false,
            }
        }

        fn held(release: Arc<Notify>) -> Self {
            Self {
                chunks: vec![],
                exit_code: 0,
                release: Some(release),
                wait_for_abort: false,
            }
        }

        fn abortable() -> Self {
            Self {
                chunks: vec![],
                exit_code: 0,
                release: None,
                wait_for_abort: true,
            }
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn execute(
            &self,
            _command: &str,
            _cwd: &Path,
            signal: AbortSignal,
            output: OutputSink,
        ) -> Result<ExecOutcome, ExecutorError> {
            for chunk in &self.chunks {
                let _ = output.send((*chunk).to_string());
            }
            if self.wait_for_abort {
                signal.cancelled().await;
                return Ok(ExecOutcome::Aborted);
            }
            if let Some(release) = &self.release {
                release.notified().await;
            }
            Ok(ExecOutcome::Exited(self.exit_code))
        }
    }

    fn runner(executor: impl Executor + 'static) -> Arc<ActionRunner> {
        Arc::new(ActionRunner::new(Arc::new(executor)))
    }

    async fn wait_until_running(runner: &ActionRunner) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !runner.is_running() {
            assert!(tokio::time::Instant::now() < deadline, "runner never started");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_submit_returns_pending_action() {
        let runner = runner(ScriptedExecutor::exiting(vec![], 0));
        let id = runner.submit("ls", "/tmp");
        let action = runner.action(id).unwrap();
        assert_eq!(action.status, ActionStatus::Pending);
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn test_run_completes_and_captures_output() {
        let runner = runner(ScriptedExecutor::exiting(vec!["hel", "lo"], 0));
        let id = runner.submit("echo hello", "/tmp");

        let output = runner.run(id).await.unwrap();
        assert_eq!(output, "hello");

        let action = runner.action(id).unwrap();
        assert_eq!(action.status, ActionStatus::Complete);
        assert!(action.executed);
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn test_run_broadcasts_start_output_exit() {
        let runner = runner(ScriptedExecutor::exiting(vec!["out"], 0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        runner.peers().add(Peer::new(tx));

        let id = runner.submit("echo out", "/tmp");
        runner.run(id).await.unwrap();

        let actions: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|env| env.action)
            .collect();
        assert_eq!(actions, ["start", "output", "exit"]);
    }

    #[tokio::test]
    async fn test_second_run_fails_fast_and_leaves_first_untouched() {
        let release = Arc::new(Notify::new());
        let runner = runner(ScriptedExecutor::held(Arc::clone(&release)));

        let first = runner.submit("long", "/tmp");
        let second = runner.submit("eager", "/tmp");

        let task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.run(first).await })
        };
        wait_until_running(&runner).await;

        assert!(matches!(
            runner.run(second).await,
            Err(RunnerError::AlreadyRunning)
        ));
        assert_eq!(runner.action(first).unwrap().status, ActionStatus::Running);
        assert_eq!(runner.action(second).unwrap().status, ActionStatus::Pending);

        release.notify_one();
        task.await.unwrap().unwrap();
        assert_eq!(runner.action(first).unwrap().status, ActionStatus::Complete);
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn test_abort_finishes_aborted_never_complete() {
        let runner = runner(ScriptedExecutor::abortable());
        let id = runner.submit("spin", "/tmp");

        let task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.run(id).await })
        };
        wait_until_running(&runner).await;

        assert!(runner.abort(id));
        task.await.unwrap().unwrap();

        let action = runner.action(id).unwrap();
        assert_eq!(action.status, ActionStatus::Aborted);
        assert!(!action.executed);
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_with_error_text() {
        let runner = runner(ScriptedExecutor::exiting(vec!["boom"], 2));
        let id = runner.submit("false", "/tmp");

        let err = runner.run(id).await.unwrap_err();
        assert!(matches!(err, RunnerError::ExecutionFailed(_)));

        let action = runner.action(id).unwrap();
        assert_eq!(action.status, ActionStatus::Failed);
        assert!(action.error.as_deref().unwrap().contains('2'));
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn test_finished_action_cannot_rerun() {
        let runner = runner(ScriptedExecutor::exiting(vec![], 0));
        let id = runner.submit("once", "/tmp");
        runner.run(id).await.unwrap();

        assert!(matches!(
            runner.run(id).await,
            Err(RunnerError::AlreadyStarted(_))
        ));
        assert_eq!(runner.action(id).unwrap().status, ActionStatus::Complete);
    }

    #[tokio::test]
    async fn test_abort_of_non_current_action_is_refused() {
        let runner = runner(ScriptedExecutor::exiting(vec![], 0));
        let id = runner.submit("idle", "/tmp");
        assert!(!runner.abort(id));
        assert_eq!(runner.action(id).unwrap().status, ActionStatus::Pending);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_shell_roundtrip() {
        let runner = Arc::new(ActionRunner::new(Arc::new(crate::ShellExecutor)));
        let id = runner.submit("echo from_the_shell", std::env::temp_dir());
        let output = runner.run(id).await.unwrap();
        assert!(output.contains("from_the_shell"));
        assert_eq!(runner.action(id).unwrap().status, ActionStatus::Complete);
    }
}
