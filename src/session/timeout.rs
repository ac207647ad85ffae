//! Silence watchdog bound to one generation attempt.
//!
//! [`TimeoutMonitor::arm`] spawns a timer task and returns a
//! [`TimeoutHandle`]. Every [`reset`](TimeoutHandle::reset) restarts the full
//! silence period; only an uninterrupted period runs the timeout action.
//! The action runs at most once, after which the task exits and the monitor
//! must be re-armed by a new attempt. Dropping the handle disarms the timer.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

/// Default silence bound: five minutes.
pub const DEFAULT_SILENCE_TIMEOUT: Duration = Duration::from_secs(300);

/// Builder for a silence watchdog.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutMonitor {
    duration: Duration,
}

impl Default for TimeoutMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_SILENCE_TIMEOUT)
    }
}

impl TimeoutMonitor {
    /// Construct a monitor with the given silence bound.
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Silence bound.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Start the timer; `on_timeout` is polled only if the bound elapses.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn arm<F>(&self, on_timeout: F) -> TimeoutHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let reset_notify = Arc::new(Notify::new());
        let fired = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let join_handle = tokio::spawn(
            Self::run(
                self.duration,
                on_timeout,
                cancel.clone(),
                Arc::clone(&reset_notify),
                Arc::clone(&fired),
            )
            .instrument(info_span!("timeout_monitor")),
        );

        TimeoutHandle {
            reset_notify,
            fired,
            cancel,
            join_handle: Some(join_handle),
        }
    }

    /// Core timer loop.
    async fn run<F>(
        duration: Duration,
        on_timeout: F,
        cancel: CancellationToken,
        reset_notify: Arc<Notify>,
        fired: Arc<AtomicBool>,
    ) where
        F: Future<Output = ()> + Send,
    {
        loop {
            let elapsed = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("timeout monitor disarmed");
                    return;
                }
                () = reset_notify.notified() => false,
                () = tokio::time::sleep(duration) => true,
            };

            if elapsed {
                break;
            }
        }

        fired.store(true, Ordering::SeqCst);
        let silence_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        warn!(silence_ms, "silence bound exceeded");

        tokio::select! {
            biased;
            () = cancel.cancelled() => debug!("timeout monitor disarmed while firing"),
            () = on_timeout => {}
        }
    }
}

/// Handle returned from [`TimeoutMonitor::arm`].
#[derive(Debug)]
pub struct TimeoutHandle {
    reset_notify: Arc<Notify>,
    fired: Arc<AtomicBool>,
    cancel: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl TimeoutHandle {
    /// Restart the silence period.
    pub fn reset(&self) {
        self.reset_notify.notify_one();
    }

    /// Stop the timer. Idempotent.
    pub fn disarm(&self) {
        self.cancel.cancel();
    }

    /// Whether the timer can still fire.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        !self.cancel.is_cancelled() && !self.has_fired()
    }

    /// Whether the silence bound elapsed.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Disarm and wait for the timer task to exit.
    pub async fn await_completion(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TimeoutHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
