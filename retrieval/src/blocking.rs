//! Bounded execution of synchronous storage calls from async code.
//!
//! Reads go through [`run_blocking`], which stops waiting once the timeout passes and leaves
//! the read to finish unobserved. Writes go through [`run_blocking_write`]: the task receives a
//! [`Deadline`] it must check immediately before committing, and the caller waits for the task
//! to return, so a write reported as failed never lands afterwards.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{IndexError, Result};

/// Commit cutoff handed to write-side storage calls.
///
/// A write checks its deadline right before it becomes visible (a redb commit, a rename) and
/// aborts instead when the time budget is spent or the caller has gone away.
#[derive(Debug, Clone)]
pub struct Deadline {
    operation: &'static str,
    budget: Duration,
    at: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl Deadline {
    /// A deadline that never passes.
    #[must_use]
    pub fn never() -> Self {
        Self {
            operation: "write",
            budget: Duration::MAX,
            at: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A deadline `budget` from now.
    #[must_use]
    pub fn after(operation: &'static str, budget: Duration) -> Self {
        Self {
            operation,
            budget,
            at: Instant::now().checked_add(budget),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns `true` once the budget is spent or the waiting caller was dropped.
    #[must_use]
    pub fn has_passed(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Fails if the write may no longer commit.
    ///
    /// # Errors
    /// [`IndexError::Failed`] if the caller was cancelled, [`IndexError::Timeout`] if the budget
    /// is spent.
    pub fn check(&self) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(IndexError::failed(format!("{} cancelled", self.operation)));
        }
        if self.has_passed() {
            return Err(IndexError::Timeout {
                operation: self.operation,
                after: self.budget,
            });
        }
        Ok(())
    }
}

/// Flags the deadline as cancelled if the awaiting future is dropped before the task returns.
struct CancelOnDrop {
    cancelled: Arc<AtomicBool>,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }
}

/// Runs `task` on the blocking pool and waits at most `timeout` for it.
///
/// On timeout the caller gets [`IndexError::Timeout`]; the task itself keeps running to
/// completion on its thread. Only use this for calls with no visible side effects.
pub(crate) async fn run_blocking<T, F>(
    operation: &'static str,
    timeout: Duration,
    task: F,
) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(task);
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(IndexError::failed(format!("{operation} panicked: {join}"))),
        Err(_) => Err(IndexError::Timeout {
            operation,
            after: timeout,
        }),
    }
}

/// Runs a write on the blocking pool under a [`Deadline`] of `timeout`.
///
/// The task must call [`Deadline::check`] right before committing. This waits for the task
/// to return even past the deadline, so the outcome it reports is the outcome on disk. If the
/// returned future is dropped, the deadline is cancelled and a task that has not committed yet
/// aborts.
pub(crate) async fn run_blocking_write<T, F>(
    operation: &'static str,
    timeout: Duration,
    task: F,
) -> Result<T>
where
    F: FnOnce(Deadline) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let deadline = Deadline::after(operation, timeout);
    let mut cancel = CancelOnDrop {
        cancelled: Arc::clone(&deadline.cancelled),
        armed: true,
    };
    let outcome = tokio::task::spawn_blocking(move || task(deadline)).await;
    cancel.armed = false;
    match outcome {
        Ok(result) => result,
        Err(join) => Err(IndexError::failed(format!("{operation} panicked: {join}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn returns_task_result() {
        let value = run_blocking("sum", Duration::from_secs(1), || Ok(2 + 2))
            .await
            .unwrap();
        assert_eq!(value, 4);
    }

    #[tokio::test]
    async fn propagates_task_error() {
        let err = run_blocking::<(), _>("load", Duration::from_secs(1), || {
            Err(IndexError::NoInput)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, IndexError::NoInput));
    }

    #[tokio::test]
    async fn times_out() {
        let err = run_blocking("slow read", Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            IndexError::Timeout {
                operation: "slow read",
                ..
            }
        ));
    }

    #[test]
    fn deadline_passes() {
        assert!(Deadline::never().check().is_ok());
        assert!(Deadline::after("save", Duration::from_secs(60)).check().is_ok());

        let spent = Deadline::after("save", Duration::ZERO);
        assert!(spent.has_passed());
        assert!(matches!(
            spent.check(),
            Err(IndexError::Timeout {
                operation: "save",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn late_write_does_not_commit() {
        let committed = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&committed);
        let err = run_blocking_write("slow write", Duration::from_millis(20), move |deadline| {
            std::thread::sleep(Duration::from_millis(100));
            deadline.check()?;
            *flag.lock() = true;
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, IndexError::Timeout { .. }));
        assert!(!*committed.lock());
    }

    #[tokio::test]
    async fn write_waits_for_the_task() {
        let committed = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&committed);
        run_blocking_write("write", Duration::from_secs(5), move |deadline| {
            std::thread::sleep(Duration::from_millis(50));
            deadline.check()?;
            *flag.lock() = true;
            Ok(())
        })
        .await
        .unwrap();
        assert!(*committed.lock());
    }

    #[tokio::test]
    async fn dropped_caller_cancels_the_write() {
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        let write = run_blocking_write("write", Duration::from_secs(5), move |deadline| {
            std::thread::sleep(Duration::from_millis(100));
            *slot.lock() = Some(deadline.check().is_err());
            Ok(())
        });

        assert!(
            tokio::time::timeout(Duration::from_millis(20), write)
                .await
                .is_err()
        );
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*seen.lock(), Some(true));
    }
}
