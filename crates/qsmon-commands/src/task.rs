//! Orchestration of one logical command invocation.
//!
//! A [`CommandTask`] wraps a command with a retry loop and a per-attempt
//! deadline. Each attempt runs the command's asynchronous path on its own
//! tokio task and waits for a result tagged with the command's identity.
//!
//! ```text
//! Created -> Running -> {Retrying <-> Running} -> {Completed | Cancelled}
//! ```
//!
//! Cancellation is cooperative: an in-flight device call is never
//! interrupted, its late result is simply discarded.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use qsmon_core::EngineConfig;

use crate::command::{panic_message, Command, CommandError, CommandKind};
use crate::result::CommandResult;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::timeout::{TimeoutManager, DEFAULT_POLL_INTERVAL};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Running,
    Retrying,
    Completed,
    Cancelled,
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Cancelled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Created => "created",
            TaskState::Running => "running",
            TaskState::Retrying => "retrying",
            TaskState::Completed => "completed",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Timeout and retry settings for a task.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Per-attempt deadline; zero disables the watchdog.
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub poll_interval: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryConfig::none(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl From<&EngineConfig> for TaskConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.default_timeout_secs),
            retry: RetryConfig::from(config),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }
}

/// Summary of a finished task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task_id: Uuid,
    pub command: &'static str,
    pub kind: CommandKind,
    pub success: bool,
    pub error: Option<String>,
    pub state: TaskState,
    pub retries: u32,
    pub execution_time_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Progress notifications broadcast by a running task.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    Started {
        task_id: Uuid,
        command: &'static str,
    },
    Retrying {
        task_id: Uuid,
        attempt: u32,
        max_retries: u32,
        error: String,
    },
    Completed(TaskReport),
}

/// Receives the command and its final result.
pub type TaskCallback<C> = Box<dyn FnOnce(&C, CommandResult<<C as Command>::Output>) + Send>;

/// Cancel and observe a task after it has been handed to [`CommandTask::run`].
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: Uuid,
    token: CancellationToken,
    state: Arc<Mutex<TaskState>>,
}

impl TaskHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }
}

enum Attempt<T> {
    Finished(CommandResult<T>),
    TimedOut,
    Cancelled,
}

/// Retry loop plus deadline around one command.
pub struct CommandTask<C: Command> {
    id: Uuid,
    command: Arc<C>,
    config: TaskConfig,
    token: CancellationToken,
    state: Arc<Mutex<TaskState>>,
    events: broadcast::Sender<TaskEvent>,
    // Behind a lock so a running task stays `Sync` across awaits.
    callback: Mutex<Option<TaskCallback<C>>>,
}

impl<C: Command + 'static> CommandTask<C> {
    pub fn new(command: C) -> Self {
        Self::from_arc(Arc::new(command))
    }

    pub fn from_arc(command: Arc<C>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            id: Uuid::new_v4(),
            command,
            config: TaskConfig::default(),
            token: CancellationToken::new(),
            state: Arc::new(Mutex::new(TaskState::Created)),
            events,
            callback: Mutex::new(None),
        }
    }

    pub fn with_config(mut self, config: TaskConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the completion callback. It runs at most once, with the final
    /// result.
    pub fn on_complete<F>(self, callback: F) -> Self
    where
        F: FnOnce(&C, CommandResult<C::Output>) + Send + 'static,
    {
        *self.callback.lock() = Some(Box::new(callback));
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn command(&self) -> &Arc<C> {
        &self.command
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            id: self.id,
            token: self.token.clone(),
            state: self.state.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }

    fn publish(&self, event: TaskEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Run the task to completion.
    pub async fn run(self) -> TaskReport {
        let started = Instant::now();
        let name = self.command.name();
        let mut policy = RetryPolicy::new(self.config.retry.clone());
        policy.reset();

        if self.token.is_cancelled() {
            tracing::debug!(task_id = %self.id, command = name, "Task cancelled before start");
            let result = self.cancelled_result();
            return self.finish(result, TaskState::Completed, 0, started);
        }

        self.set_state(TaskState::Running);
        self.publish(TaskEvent::Started {
            task_id: self.id,
            command: name,
        });
        tracing::debug!(
            task_id = %self.id,
            command = name,
            timeout_secs = self.config.timeout.as_secs_f64(),
            max_retries = policy.max_retries(),
            "Task started"
        );

        let (result, state) = loop {
            let failure = match self.attempt(name).await {
                Attempt::Finished(result) if result.is_success() => {
                    break (result, TaskState::Completed);
                }
                Attempt::Finished(result) => result,
                Attempt::TimedOut => CommandResult::from_command_error(CommandError::Timeout(self.config.timeout))
                    .with_issuer(self.command.identity()),
                Attempt::Cancelled => {
                    break (self.cancelled_result(), TaskState::Cancelled);
                }
            };

            if !failure.is_retryable() {
                tracing::debug!(
                    task_id = %self.id,
                    command = name,
                    error = failure.error().unwrap_or_default(),
                    "Attempt failed with a terminal error"
                );
                break (failure, TaskState::Completed);
            }
            if !policy.should_retry() {
                break (failure, TaskState::Completed);
            }

            let error = failure.error().unwrap_or_default().to_string();
            self.set_state(TaskState::Retrying);
            self.publish(TaskEvent::Retrying {
                task_id: self.id,
                attempt: policy.current_retry_count() + 1,
                max_retries: policy.max_retries(),
                error: error.clone(),
            });
            tracing::debug!(task_id = %self.id, command = name, error = %error, "Attempt failed, retrying");

            let cancelled = tokio::select! {
                biased;
                _ = self.token.cancelled() => true,
                _ = policy.wait_for_next_retry(name) => false,
            };
            if cancelled {
                break (self.cancelled_result(), TaskState::Cancelled);
            }
            self.set_state(TaskState::Running);
        };

        let retries = policy.current_retry_count();
        self.finish(result, state, retries, started)
    }

    fn cancelled_result(&self) -> CommandResult<C::Output> {
        CommandResult::from_command_error(CommandError::Cancelled).with_issuer(self.command.identity())
    }

    /// One attempt: dispatch, then wait for a matching result, the attempt
    /// deadline, or cancellation.
    async fn attempt(&self, name: &'static str) -> Attempt<C::Output> {
        if self.token.is_cancelled() {
            return Attempt::Cancelled;
        }

        let attempt_token = self.token.child_token();
        let deadline = attempt_token.clone();
        let task_id = self.id;
        let mut watchdog = TimeoutManager::new(self.config.timeout, move |message| {
            tracing::warn!(task_id = %task_id, command = name, "{}", message);
            deadline.cancel();
        })
        .with_poll_interval(self.config.poll_interval);
        watchdog.start_monitoring(name);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let command = self.command.clone();
        tokio::spawn(async move {
            command
                .execute_async(Box::new(move |result| {
                    let _ = tx.send(result);
                }))
                .await;
        });

        let identity = self.command.identity();
        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break Attempt::Cancelled,
                _ = attempt_token.cancelled() => break Attempt::TimedOut,
                received = rx.recv() => match received {
                    Some(result) if result.is_from(identity) => break Attempt::Finished(result),
                    Some(result) => {
                        tracing::debug!(
                            task_id = %self.id,
                            command = name,
                            expected = %identity,
                            issuer = ?result.issuer(),
                            "Discarding result from another command"
                        );
                    }
                    None => {
                        break Attempt::Finished(
                            CommandResult::failure("Command finished without a result")
                                .with_issuer(identity),
                        )
                    }
                },
            }
        };

        watchdog.stop_monitoring().await;
        outcome
    }

    fn finish(
        &self,
        result: CommandResult<C::Output>,
        state: TaskState,
        retries: u32,
        started: Instant,
    ) -> TaskReport {
        self.set_state(state);
        let report = TaskReport {
            task_id: self.id,
            command: self.command.name(),
            kind: self.command.kind(),
            success: result.is_success(),
            error: result.error().map(str::to_string),
            state,
            retries,
            execution_time_ms: started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        };

        tracing::info!(
            task_id = %report.task_id,
            command = report.command,
            success = report.success,
            state = %state,
            retries,
            execution_time_ms = report.execution_time_ms,
            "Task finished"
        );

        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            let command = self.command.clone();
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(&command, result))) {
                tracing::error!(
                    task_id = %report.task_id,
                    error = %panic_message(payload.as_ref()),
                    "Task callback panicked"
                );
            }
        }

        self.publish(TaskEvent::Completed(report.clone()));
        report
    }
}

impl<C: Command> fmt::Debug for CommandTask<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandTask")
            .field("id", &self.id)
            .field("command", &self.command.name())
            .field("state", &*self.state.lock())
            .field("config", &self.config)
            .finish()
    }
}
