//! Timing subsystem for request timeouts and speculative executions.
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use log::trace;
use thiserror::Error;
use tokio::{runtime::Handle, task::JoinHandle};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("cannot be started once stopped")]
    Stopped,
}

/// Schedules one-shot tasks on a tokio runtime.
///
/// Once stopped, no new task can be scheduled and pending tasks never run.
#[derive(Debug, Clone)]
pub struct Timer {
    handle: Handle,
    stopped: Arc<AtomicBool>,
}

impl Timer {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs `task` after `delay` unless the returned [`Timeout`] is cancelled first.
    pub fn new_timeout<F>(&self, delay: Duration, task: F) -> Result<Timeout, TimerError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_stopped() {
            return Err(TimerError::Stopped);
        }
        let stopped = Arc::clone(&self.stopped);
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if stopped.load(Ordering::Acquire) {
                trace!("Timer stopped, dropping task scheduled {delay:?} ago");
                return;
            }
            task();
        });
        Ok(Timeout {
            join,
            cancelled: AtomicBool::new(false),
        })
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// A scheduled task.
#[derive(Debug)]
pub struct Timeout {
    join: JoinHandle<()>,
    cancelled: AtomicBool,
}

impl Timeout {
    /// Returns whether this call did the cancelling.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.join.abort();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[tokio::test]
    async fn fires_after_delay() {
        let timer = Timer::new(Handle::current());
        let (tx, rx) = tokio::sync::oneshot::channel();
        timer
            .new_timeout(Duration::from_millis(5), move || {
                let _ = tx.send(());
            })
            .unwrap();
        rx.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_task_never_runs() {
        let timer = Timer::new(Handle::current());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let timeout = timer
            .new_timeout(Duration::from_millis(20), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(timeout.cancel());
        assert!(!timeout.cancel());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stopped_timer_rejects_and_drops_tasks() {
        let timer = Timer::new(Handle::current());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        timer
            .new_timeout(Duration::from_millis(20), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        timer.stop();
        let err = timer.new_timeout(Duration::ZERO, || {}).unwrap_err();
        assert_eq!(err.to_string(), "cannot be started once stopped");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
