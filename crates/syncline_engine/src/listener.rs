//! The shared listener reconnect state machine.
//!
//! Both engine types need identical reconnect semantics, so the state
//! machine is implemented once and parameterized by an attach callback:
//! the callback runs one full stream session (open the stream, pump its
//! events into the engine) and returns when the stream ends or fails.
//!
//! States: `Detached → Attaching → Attached`, with `Backoff(n)` between
//! failed sessions. The supervising task owns both the in-flight session
//! and the scheduled re-attach sleep; `stop()` aborts it from any state.

use crate::config::RetryConfig;
use crate::error::EngineResult;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use syncline_core::{EventSink, SyncEvent};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One stream session. Called once per attach attempt; resolves when the
/// stream ends (`Err` for failure or termination, `Ok` if the session was
/// superseded).
pub type AttachFn = Arc<dyn Fn(AttachHandle) -> BoxFuture<'static, EngineResult<()>> + Send + Sync>;

/// The current state of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// No listener is running.
    Detached,
    /// A stream is being opened, or has not yet delivered an event.
    Attaching,
    /// The stream has delivered at least one event.
    Attached,
    /// Waiting out the backoff delay after the n-th consecutive failure.
    Backoff(u32),
}

struct ControllerInner {
    state: ListenerState,
    retry_count: u32,
    task: Option<JoinHandle<()>>,
}

/// Governs (re)attachment of a remote change stream with a fixed
/// exponential backoff schedule.
///
/// The retry count resets on the first event of a successful attach and on
/// explicit [`stop`](Self::stop), not between consecutive failures: a
/// second failure continues the schedule rather than restarting it.
pub struct ListenerRetryController {
    retry: RetryConfig,
    sink: Option<Arc<dyn EventSink>>,
    namespace: String,
    inner: Mutex<ControllerInner>,
    // Bumped on every start/stop; tasks from older epochs are inert.
    epoch: AtomicU64,
}

impl ListenerRetryController {
    /// Creates a detached controller.
    pub fn new(retry: RetryConfig, sink: Option<Arc<dyn EventSink>>, namespace: String) -> Self {
        Self {
            retry,
            sink,
            namespace,
            inner: Mutex::new(ControllerInner {
                state: ListenerState::Detached,
                retry_count: 0,
                task: None,
            }),
            epoch: AtomicU64::new(0),
        }
    }

    /// The current state.
    pub fn state(&self) -> ListenerState {
        self.inner.lock().state
    }

    /// Consecutive failures since the last success or stop.
    pub fn retry_count(&self) -> u32 {
        self.inner.lock().retry_count
    }

    /// Returns true while the controller is waiting out a backoff delay.
    pub fn is_failed(&self) -> bool {
        matches!(self.state(), ListenerState::Backoff(_))
    }

    /// Starts (or restarts) listening.
    ///
    /// Any in-flight session is cancelled. The retry count is carried over,
    /// so an opportunistic restart during backoff does not reset the
    /// schedule; only a delivered event or an explicit stop does.
    pub fn start(self: &Arc<Self>, attach: AttachFn) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let controller = Arc::clone(self);
        let supervisor = tokio::spawn(async move { controller.supervise(attach, epoch).await });

        let mut inner = self.inner.lock();
        if let Some(task) = inner.task.replace(supervisor) {
            task.abort();
        }
        inner.state = ListenerState::Attaching;
    }

    /// Stops listening from any state.
    ///
    /// Cancels the in-flight stream session and any scheduled retry, and
    /// resets the retry count.
    pub fn stop(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.state = ListenerState::Detached;
        inner.retry_count = 0;
    }

    async fn supervise(self: Arc<Self>, attach: AttachFn, epoch: u64) {
        loop {
            let handle = AttachHandle {
                controller: Arc::clone(&self),
                epoch,
            };
            let result = (attach)(handle).await;
            if !self.is_current(epoch) {
                return;
            }

            let error = match result {
                Ok(()) => return,
                Err(e) => e,
            };

            let (retry_count, delay) = {
                let mut inner = self.inner.lock();
                inner.retry_count += 1;
                inner.state = ListenerState::Backoff(inner.retry_count);
                (inner.retry_count, self.retry.delay_for_retry(inner.retry_count))
            };

            warn!(
                namespace = %self.namespace,
                %error,
                retry_count,
                delay_secs = delay.as_secs_f64(),
                "listener stream failed, backing off"
            );
            self.emit(SyncEvent::ListenerFailed {
                error: error.to_string(),
            });
            self.emit(SyncEvent::ListenerRetrying { retry_count, delay });

            tokio::time::sleep(delay).await;
            if !self.is_current(epoch) {
                return;
            }
            self.inner.lock().state = ListenerState::Attaching;
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(sink) = &self.sink {
            sink.event(&self.namespace, &event);
        }
    }
}

/// Handed to each stream session so it can report delivery.
#[derive(Clone)]
pub struct AttachHandle {
    controller: Arc<ListenerRetryController>,
    epoch: u64,
}

impl AttachHandle {
    /// Marks the listener attached on the first delivered event; resets the
    /// retry count. Idempotent within a session, inert once superseded.
    pub fn mark_attached(&self) {
        if !self.controller.is_current(self.epoch) {
            return;
        }
        let newly_attached = {
            let mut inner = self.controller.inner.lock();
            let changed = inner.state != ListenerState::Attached;
            inner.state = ListenerState::Attached;
            inner.retry_count = 0;
            changed
        };
        if newly_attached {
            debug!(namespace = %self.controller.namespace, "listener attached");
            self.controller.emit(SyncEvent::ListenerAttached);
        }
    }

    /// Returns false once this session has been superseded by a restart or
    /// stop; sessions should wind down without touching engine state.
    pub fn is_current(&self) -> bool {
        self.controller.is_current(self.epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn test_controller(retry: RetryConfig) -> Arc<ListenerRetryController> {
        Arc::new(ListenerRetryController::new(retry, None, "test".into()))
    }

    fn failing_attach(attempts: Arc<AtomicUsize>) -> AttachFn {
        Arc::new(move |_handle| {
            let attempts = Arc::clone(&attempts);
            Box::pin(async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::unavailable("no route"))
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn failures_walk_the_backoff_schedule() {
        let controller = test_controller(RetryConfig::new());
        let attempts = Arc::new(AtomicUsize::new(0));
        controller.start(failing_attach(Arc::clone(&attempts)));

        // 1 initial attempt + retries after 2, 4, 8 seconds = 4 attempts
        // within the first 14 seconds of paused time.
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(controller.state(), ListenerState::Backoff(4));
        assert_eq!(controller.retry_count(), 4);

        controller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn retry_count_continues_across_consecutive_failures() {
        let controller = test_controller(
            RetryConfig::new()
                .with_base_delay(Duration::from_millis(10))
                .with_max_delay(Duration::from_millis(40)),
        );
        let attempts = Arc::new(AtomicUsize::new(0));
        controller.start(failing_attach(Arc::clone(&attempts)));

        tokio::time::sleep(Duration::from_millis(500)).await;
        // Schedule is 10, 20, 40, 40, ...; the count keeps climbing
        // instead of restarting at 1.
        assert!(controller.retry_count() > 5);
        controller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_resets_retry_count_and_cancels_retry() {
        let controller = test_controller(RetryConfig::new());
        let attempts = Arc::new(AtomicUsize::new(0));
        controller.start(failing_attach(Arc::clone(&attempts)));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(controller.retry_count() >= 1);

        controller.stop();
        assert_eq!(controller.state(), ListenerState::Detached);
        assert_eq!(controller.retry_count(), 0);

        // No scheduled retry survives the stop.
        let before = attempts.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), before);
    }

    #[tokio::test(start_paused = true)]
    async fn first_event_marks_attached_and_resets_count() {
        let controller = test_controller(
            RetryConfig::new().with_base_delay(Duration::from_millis(10)),
        );
        let fail_first = Arc::new(AtomicUsize::new(0));
        let fail_first_clone = Arc::clone(&fail_first);

        let attach: AttachFn = Arc::new(move |handle| {
            let fail_first = Arc::clone(&fail_first_clone);
            Box::pin(async move {
                if fail_first.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(EngineError::unavailable("no route"));
                }
                handle.mark_attached();
                // Keep the session open.
                futures::future::pending::<()>().await;
                unreachable!()
            })
        });

        controller.start(attach);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(controller.state(), ListenerState::Attached);
        assert_eq!(controller.retry_count(), 0);
        controller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stale_session_cannot_mark_attached() {
        let controller = test_controller(RetryConfig::new());

        let (handle_tx, mut handle_rx) = tokio::sync::mpsc::channel::<AttachHandle>(1);
        let attach: AttachFn = Arc::new(move |handle| {
            let handle_tx = handle_tx.clone();
            Box::pin(async move {
                let _ = handle_tx.send(handle).await;
                futures::future::pending::<()>().await;
                unreachable!()
            })
        });

        controller.start(attach);
        let stale = handle_rx.recv().await.unwrap();
        controller.stop();

        stale.mark_attached();
        assert!(!stale.is_current());
        assert_eq!(controller.state(), ListenerState::Detached);
    }
}
