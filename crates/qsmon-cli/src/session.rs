//! Monitoring session state.

use std::fmt;
use std::sync::Arc;

use qsmon_core::{Event, EventManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Running,
    Paused,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Stopped => "stopped",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the `monitor` session and publishes every state change.
///
/// Losing the device pauses a running session; getting it back resumes it.
/// Only `start` and `stop` count as manual changes.
pub struct MonitorSession {
    state: SessionState,
    events: Arc<EventManager>,
}

impl MonitorSession {
    pub fn new(events: Arc<EventManager>) -> Self {
        Self {
            state: SessionState::Stopped,
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn start(&mut self) {
        if self.state == SessionState::Stopped {
            self.transition(SessionState::Running, true);
        }
    }

    pub fn stop(&mut self) {
        self.transition(SessionState::Stopped, true);
    }

    /// Follow device connectivity.
    pub fn device_connection_changed(&mut self, connected: bool) {
        match (self.state, connected) {
            (SessionState::Running, false) => self.transition(SessionState::Paused, false),
            (SessionState::Paused, true) => self.transition(SessionState::Running, false),
            _ => {}
        }
    }

    fn transition(&mut self, next: SessionState, manual: bool) {
        if next == self.state {
            return;
        }
        let previous = std::mem::replace(&mut self.state, next);
        tracing::info!(previous = %previous, state = %next, manual, "Session state changed");
        self.events.emit(Event::SessionStateChanged {
            state: next.to_string(),
            manual,
            previous_state: previous.to_string(),
        });
    }
}
