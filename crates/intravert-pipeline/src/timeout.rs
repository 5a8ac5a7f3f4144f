//! One-shot request deadlines.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::aggregator::CallerHandle;

/// Marker event produced when a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline;

/// The scheduled deadline for one request. At most one per request.
///
/// Dropping the handle disarms it, so a request that ends on any path
/// releases its timer.
#[derive(Debug)]
pub struct TimerHandle {
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// Send a [`Deadline`] event on `events` after `duration`.
    ///
    /// The callback checks the caller's terminated flag first and does
    /// nothing if the request already finished.
    pub fn arm<E>(
        duration: Duration,
        caller: Arc<CallerHandle>,
        events: mpsc::UnboundedSender<E>,
    ) -> Self
    where
        E: From<Deadline> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if caller.is_terminated() {
                return;
            }
            tracing::warn!(timeout_ms = duration.as_millis() as u64, "Request deadline reached");
            if events.send(E::from(Deadline)).is_err() {
                tracing::debug!("Deadline fired after the sequencer exited");
            }
        });
        Self { task: Some(task) }
    }

    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancel the timer. Returns `true` on the first call only; disarming a
    /// timer that already fired is a no-op.
    pub fn disarm(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.disarm();
    }
}
