//! Parallel per-role action fan-out.
//!
//! Every action is spawned before any is awaited. Joining then walks the
//! handles in role order against one shared deadline:
//!
//! - finished in time: the action's own result
//! - deadline passed: `ActionError::TimedOut`; the task keeps running detached
//!   and whatever it eventually returns is dropped
//! - cancellation token fired: `ActionError::Cancelled`; the task is aborted
//! - task panicked: `ActionError::Failed` with the panic message

use crate::roles::RoleMap;
use certkit_core::error::ActionError;
use certkit_core::model::Role;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One role's unit of work.
pub type Action = BoxFuture<'static, anyhow::Result<()>>;

/// Per-role results of one fan-out.
pub type ActionResults = RoleMap<Result<(), ActionError>>;

/// How long the join may wait for the slowest action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinTimeout {
    /// Wait as long as it takes
    Unbounded,
    /// Give up on unfinished actions after this long
    Bounded(Duration),
}

impl JoinTimeout {
    /// `None` means unbounded
    pub fn from_millis(ms: Option<u64>) -> Self {
        match ms {
            Some(ms) => Self::Bounded(Duration::from_millis(ms)),
            None => Self::Unbounded,
        }
    }

    /// Run `fut` under this bound; `None` when the bound expired
    pub async fn apply<F: std::future::Future>(&self, fut: F) -> Option<F::Output> {
        match self {
            Self::Unbounded => Some(fut.await),
            Self::Bounded(after) => tokio::time::timeout(*after, fut).await.ok(),
        }
    }
}

/// A set of per-role actions waiting to be fanned out.
pub struct FanOut {
    actions: Vec<(Role, Action)>,
    timeout: JoinTimeout,
}

impl FanOut {
    /// Empty fan-out with the given join bound
    pub fn new(timeout: JoinTimeout) -> Self {
        Self {
            actions: Vec::new(),
            timeout,
        }
    }

    /// Add `role`'s action; a role may appear once
    pub fn push(&mut self, role: Role, action: Action) -> Result<(), ActionError> {
        if self.actions.iter().any(|(existing, _)| *existing == role) {
            return Err(ActionError::DuplicateRole(role));
        }
        self.actions.push((role, action));
        Ok(())
    }

    /// Number of queued actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Spawn every action, then join them
    pub async fn run(self, cancel: &CancellationToken) -> ActionResults {
        let mut results = ActionResults::new();
        if cancel.is_cancelled() {
            for (role, _) in self.actions {
                results.insert(role, Err(ActionError::Cancelled));
            }
            return results;
        }

        let deadline = match self.timeout {
            JoinTimeout::Unbounded => None,
            JoinTimeout::Bounded(after) => Some((Instant::now() + after, after)),
        };

        let mut handles: Vec<(Role, JoinHandle<anyhow::Result<()>>)> = self
            .actions
            .into_iter()
            .map(|(role, action)| (role, tokio::spawn(action)))
            .collect();
        handles.sort_by_key(|(role, _)| *role);

        for (role, handle) in handles {
            let result = join_one(handle, deadline, cancel).await;
            match &result {
                Ok(()) => tracing::debug!(role = %role, "Action finished"),
                Err(err) => tracing::warn!(role = %role, error = %err, "Action did not succeed"),
            }
            results.insert(role, result);
        }
        results
    }
}

async fn join_one(
    mut handle: JoinHandle<anyhow::Result<()>>,
    deadline: Option<(Instant, Duration)>,
    cancel: &CancellationToken,
) -> Result<(), ActionError> {
    let abort = handle.abort_handle();
    let joined = async {
        match deadline {
            None => Some((&mut handle).await),
            Some((at, _)) => tokio::time::timeout_at(at, &mut handle).await.ok(),
        }
    };

    let outcome = tokio::select! {
        biased;
        joined = joined => joined,
        _ = cancel.cancelled() => {
            abort.abort();
            return Err(ActionError::Cancelled);
        }
    };

    match (outcome, deadline) {
        (Some(Ok(Ok(()))), _) => Ok(()),
        (Some(Ok(Err(err))), _) => Err(ActionError::failed(&err)),
        (Some(Err(join_err)), _) => Err(from_join_error(join_err)),
        (None, Some((_, after))) => Err(ActionError::TimedOut { after }),
        (None, None) => Err(ActionError::TimedOut {
            after: Duration::ZERO,
        }),
    }
}

fn from_join_error(err: JoinError) -> ActionError {
    if err.is_cancelled() {
        return ActionError::Cancelled;
    }
    match err.try_into_panic() {
        Ok(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker panicked".to_string());
            ActionError::Failed(format!("worker panicked: {}", message))
        }
        Err(_) => ActionError::Failed("worker failed to join".to_string()),
    }
}

/// Run every `(role, action)` pair concurrently and join them.
///
/// A repeated role is rejected with `ActionError::DuplicateRole` before
/// anything is spawned.
pub async fn run_parallel(
    actions: Vec<(Role, Action)>,
    timeout: JoinTimeout,
    cancel: &CancellationToken,
) -> Result<ActionResults, ActionError> {
    let mut fanout = FanOut::new(timeout);
    for (role, action) in actions {
        fanout.push(role, action)?;
    }
    Ok(fanout.run(cancel).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::sleep;

    fn delayed(ms: u64) -> Action {
        async move {
            sleep(Duration::from_millis(ms)).await;
            Ok(())
        }
        .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_runs_concurrently() {
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let results = run_parallel(
            vec![
                (Role::Primary, delayed(300)),
                (Role::Secondary, delayed(500)),
                (Role::Tertiary, delayed(400)),
            ],
            JoinTimeout::Unbounded,
            &cancel,
        )
        .await
        .unwrap();

        let elapsed = start.elapsed();
        assert_eq!(results.len(), 3);
        assert!(results.values().all(Result::is_ok));
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_millis(1_200), "took {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_timeout_keeps_fast_results() {
        let cancel = CancellationToken::new();
        let results = run_parallel(
            vec![
                (Role::Child, delayed(100)),
                (Role::Inviting, delayed(10_000)),
            ],
            JoinTimeout::Bounded(Duration::from_secs(2)),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(results[&Role::Child], Ok(()));
        assert_eq!(
            results[&Role::Inviting],
            Err(ActionError::TimedOut {
                after: Duration::from_secs(2)
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_worker_keeps_running() {
        let cancel = CancellationToken::new();
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let slow: Action = async move {
            sleep(Duration::from_secs(5)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
        .boxed();

        let results = run_parallel(
            vec![(Role::Primary, slow)],
            JoinTimeout::Bounded(Duration::from_secs(1)),
            &cancel,
        )
        .await
        .unwrap();
        assert!(results[&Role::Primary].as_ref().unwrap_err().is_incomplete());

        sleep(Duration::from_secs(10)).await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failure_does_not_affect_siblings() {
        let cancel = CancellationToken::new();
        let failing: Action = async { Err(anyhow::anyhow!("install failed")) }.boxed();
        let results = run_parallel(
            vec![(Role::Primary, failing), (Role::Secondary, delayed(0))],
            JoinTimeout::Unbounded,
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(
            results[&Role::Primary],
            Err(ActionError::Failed("install failed".into()))
        );
        assert_eq!(results[&Role::Secondary], Ok(()));
    }

    #[tokio::test]
    async fn test_panicking_worker_reports_failure() {
        let cancel = CancellationToken::new();
        let panicking: Action = async { panic!("driver exploded") }.boxed();
        let results = run_parallel(
            vec![(Role::Tertiary, panicking)],
            JoinTimeout::Unbounded,
            &cancel,
        )
        .await
        .unwrap();
        match &results[&Role::Tertiary] {
            Err(ActionError::Failed(msg)) => assert!(msg.contains("driver exploded")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_role_rejected_before_spawn() {
        let cancel = CancellationToken::new();
        let spawned = Arc::new(AtomicBool::new(false));
        let flag = spawned.clone();
        let first: Action = async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
        .boxed();
        let err = run_parallel(
            vec![(Role::Child, first), (Role::Child, delayed(0))],
            JoinTimeout::Unbounded,
            &cancel,
        )
        .await
        .unwrap_err();
        assert_eq!(err, ActionError::DuplicateRole(Role::Child));
        tokio::task::yield_now().await;
        assert!(!spawned.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_resolves_unfinished_workers() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let results = run_parallel(
            vec![(Role::Primary, delayed(60_000))],
            JoinTimeout::Unbounded,
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(results[&Role::Primary], Err(ActionError::Cancelled));
    }

    #[tokio::test]
    async fn test_already_cancelled_spawns_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut fanout = FanOut::new(JoinTimeout::Unbounded);
        fanout.push(Role::Primary, delayed(0)).unwrap();
        assert_eq!(fanout.len(), 1);
        let results = fanout.run(&cancel).await;
        assert_eq!(results[&Role::Primary], Err(ActionError::Cancelled));
    }
}
