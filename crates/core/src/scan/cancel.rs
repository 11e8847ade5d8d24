//! # Cancellation Manager
//!
//! Best-effort cancellation of outstanding detector tasks. Every task is
//! signalled before any is awaited, so one misbehaving task never delays the
//! cancellation of the others.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{CancelError, ScanError};

/// Commands accepted by a running scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanCommand {
    /// Cancel outstanding detectors and fail the run
    Abort,
}

/// Wall-clock budget and abort channel of one run
pub struct RunGuard {
    budget: Duration,
    deadline: Option<Instant>,
    commands: Option<mpsc::Receiver<ScanCommand>>,
}

impl RunGuard {
    pub fn new(budget: Duration, commands: Option<mpsc::Receiver<ScanCommand>>) -> Self {
        Self {
            budget,
            deadline: Instant::now().checked_add(budget),
            commands,
        }
    }

    /// A guard that never fires
    pub fn unbounded() -> Self {
        Self {
            budget: Duration::MAX,
            deadline: None,
            commands: None,
        }
    }

    /// Resolves with the fatal error once the budget expires or an abort arrives
    ///
    /// Cancel-safe, so it can sit in a `select!` next to detector work.
    pub async fn cancelled(&mut self) -> ScanError {
        let budget = self.budget;
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        let aborted = async {
            match self.commands.as_mut() {
                Some(rx) => loop {
                    match rx.recv().await {
                        Some(ScanCommand::Abort) => break,
                        None => std::future::pending::<()>().await,
                    }
                },
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = expired => ScanError::Timeout(budget),
            _ = aborted => ScanError::Aborted,
        }
    }
}

/// A spawned detector task and the detector it runs
pub struct DetectorTask<T> {
    pub name: String,
    pub handle: JoinHandle<T>,
}

/// Cancel every still-running task and wait for each to unwind
///
/// Already-finished tasks are left alone. Cancellation acknowledgements are
/// swallowed; anything else is collected, logged, and returned.
pub async fn cancel_all<T>(outstanding: Vec<DetectorTask<T>>) -> Vec<CancelError> {
    let running: Vec<DetectorTask<T>> = outstanding
        .into_iter()
        .filter(|task| !task.handle.is_finished())
        .inspect(|task| task.handle.abort())
        .collect();

    let mut errors = Vec::new();
    let cancelled = running.len();
    for task in running {
        match task.handle.await {
            Ok(_) => {
                tracing::debug!(detector = %task.name, "Task finished before cancellation took effect");
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => errors.push(CancelError::Panicked {
                task: task.name,
                message: e.to_string(),
            }),
        }
    }

    if !errors.is_empty() {
        tracing::warn!(
            "Cancellation had {} errors out of {}: {:?}",
            errors.len(),
            cancelled,
            errors
        );
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_guard_fires_on_deadline() {
        let mut guard = RunGuard::new(Duration::from_secs(5), None);
        let err = guard.cancelled().await;
        assert!(matches!(err, ScanError::Timeout(d) if d == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_guard_fires_on_abort() {
        let (tx, rx) = mpsc::channel(1);
        let mut guard = RunGuard::new(Duration::from_secs(3_600), Some(rx));
        tx.send(ScanCommand::Abort).await.unwrap();
        assert!(matches!(guard.cancelled().await, ScanError::Aborted));
    }

    #[tokio::test]
    async fn test_unbounded_guard_stays_pending() {
        let mut guard = RunGuard::unbounded();
        let fired = tokio::time::timeout(Duration::from_millis(20), guard.cancelled()).await;
        assert!(fired.is_err());
    }

    struct PanicOnDrop;

    impl Drop for PanicOnDrop {
        fn drop(&mut self) {
            panic!("unwinding detector blew up");
        }
    }

    #[tokio::test]
    async fn test_cancel_all_swallows_cancellation() {
        let sleeper = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        });
        let handle = sleeper.abort_handle();

        let errors = cancel_all(vec![DetectorTask {
            name: "static_analyzer".to_string(),
            handle: sleeper,
        }])
        .await;

        assert!(errors.is_empty());
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_finished_tasks_are_skipped() {
        let done = tokio::spawn(async { 7 });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let errors = cancel_all(vec![DetectorTask {
            name: "pattern_matcher".to_string(),
            handle: done,
        }])
        .await;
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_failing_cancellation_does_not_block_others() {
        let bad = tokio::spawn(async {
            let _guard = PanicOnDrop;
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        });
        let good = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        });
        let good_handle = good.abort_handle();
        // Let both tasks start so the guard exists when they are cancelled.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let errors = cancel_all(vec![
            DetectorTask {
                name: "symbolic_executor".to_string(),
                handle: bad,
            },
            DetectorTask {
                name: "static_analyzer".to_string(),
                handle: good,
            },
        ])
        .await;

        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], CancelError::Panicked { task, .. } if task == "symbolic_executor"));
        assert!(good_handle.is_finished());
    }
}
