//! Deadline watchdog.
//!
//! [`TimeoutManager::start_monitoring`] spawns a watchdog task that checks
//! elapsed time once per poll interval and invokes the timeout callback when
//! the deadline passes. The callback fires at most once per monitoring
//! session, and a zero timeout disables the watchdog.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default watchdog resolution.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bound on how long `stop_monitoring` waits for the watchdog to exit.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Receives a human-readable timeout message.
pub type TimeoutCallback = Arc<dyn Fn(&str) + Send + Sync>;

struct Session {
    start: Instant,
    stop: CancellationToken,
    fired: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Per-task deadline watchdog.
pub struct TimeoutManager {
    timeout: Duration,
    poll_interval: Duration,
    callback: TimeoutCallback,
    session: Option<Session>,
}

impl TimeoutManager {
    pub fn new<F>(timeout: Duration, on_timeout: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
            callback: Arc::new(on_timeout),
            session: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Change the timeout. Takes effect from the next session.
    pub fn update_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn is_enabled(&self) -> bool {
        !self.timeout.is_zero()
    }

    /// Start a new monitoring session and return its start time.
    ///
    /// Any previous session is stopped first. Must be called from within a
    /// tokio runtime.
    pub fn start_monitoring(&mut self, name: &str) -> Instant {
        self.abort_session();

        let start = Instant::now();
        if !self.is_enabled() {
            return start;
        }

        let stop = CancellationToken::new();
        let fired = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(watchdog(
            name.to_string(),
            start,
            self.timeout,
            self.poll_interval,
            stop.clone(),
            fired.clone(),
            self.callback.clone(),
        ));

        self.session = Some(Session {
            start,
            stop,
            fired,
            handle,
        });
        start
    }

    /// Stop the current session and wait (bounded) for the watchdog to exit.
    pub async fn stop_monitoring(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.stop.cancel();
        if tokio::time::timeout(STOP_JOIN_TIMEOUT, session.handle)
            .await
            .is_err()
        {
            tracing::warn!("Timeout watchdog did not stop in time");
        }
    }

    /// Whether a watchdog is currently running.
    pub fn is_monitoring(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| !s.handle.is_finished())
            .unwrap_or(false)
    }

    /// Whether the current session's callback has fired.
    pub fn has_fired(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.fired.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Start time of the current session.
    pub fn session_start(&self) -> Option<Instant> {
        self.session.as_ref().map(|s| s.start)
    }

    pub fn is_timeout_occurred(&self, start: Instant) -> bool {
        self.is_enabled() && start.elapsed() >= self.timeout
    }

    pub fn elapsed(&self, start: Instant) -> Duration {
        start.elapsed()
    }

    /// Time left until the deadline; `None` when the timeout is disabled.
    pub fn remaining_time(&self, start: Instant) -> Option<Duration> {
        if !self.is_enabled() {
            return None;
        }
        Some(self.timeout.saturating_sub(start.elapsed()))
    }

    /// Share of the timeout already elapsed, 0-100.
    pub fn progress_percentage(&self, start: Instant) -> u8 {
        if !self.is_enabled() {
            return 0;
        }
        let pct = start.elapsed().as_secs_f64() / self.timeout.as_secs_f64() * 100.0;
        pct.min(100.0) as u8
    }

    fn abort_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop.cancel();
        }
    }
}

impl Drop for TimeoutManager {
    fn drop(&mut self) {
        self.abort_session();
    }
}

impl fmt::Debug for TimeoutManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutManager")
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .field("monitoring", &self.is_monitoring())
            .finish()
    }
}

async fn watchdog(
    name: String,
    start: Instant,
    timeout: Duration,
    poll_interval: Duration,
    stop: CancellationToken,
    fired: Arc<AtomicBool>,
    callback: TimeoutCallback,
) {
    loop {
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            if !fired.swap(true, Ordering::SeqCst) {
                let message = format!("Task timeout after {:.1} seconds", timeout.as_secs_f64());
                tracing::warn!(command = %name, "{}", message);
                callback(&message);
            }
            return;
        }

        let wait = poll_interval.min(timeout - elapsed);
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
