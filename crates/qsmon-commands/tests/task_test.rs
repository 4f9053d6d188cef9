//! Command task orchestration tests.
//!
//! Tests include:
//! - Retry bound and backoff formula
//! - Watchdog firing once per session
//! - Per-attempt timeouts that retry, then fail
//! - Cancellation before and during a run
//! - Identity isolation between commands of the same type
//! - Protocol and parse failures ending a task without retrying
//! - Worker pool execution, with and without completion callbacks

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use qsmon_commands::commands::{GetDeviceInfoCommand, ShellCommand, SymphonyGroupCommand};
use qsmon_commands::testing::MockAdapter;
use qsmon_commands::{
    impl_command_meta, Command, CommandBase, CommandIdentity, CommandMeta, CommandKind, CommandResult,
    CommandTask, ResultCallback, RetryConfig, RetryPolicy, RetryStrategy, TaskState, TimeoutManager,
    WorkerPool, WorkerPoolConfig,
};

fn shell(adapter: &Arc<MockAdapter>) -> ShellCommand {
    ShellCommand::new(adapter.clone(), "cat /proc/uptime").unwrap()
}

#[tokio::test]
async fn test_retry_count_is_bounded() {
    let mut policy = RetryPolicy::new(RetryConfig::immediate(3));
    let attempts = AtomicUsize::new(0);

    let outcome: Result<(), String> = policy
        .execute_with_retry("always_fails", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err("device busy".to_string()) }
        })
        .await;

    assert_eq!(outcome, Err("device busy".to_string()));
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(policy.current_retry_count(), 3);
    assert!(policy.is_exhausted());
}

#[test]
fn test_exponential_backoff_formula() {
    let config = RetryConfig::default()
        .with_strategy(RetryStrategy::Exponential)
        .with_base_delay(Duration::from_secs(1))
        .with_backoff_factor(2.0)
        .with_max_delay(Duration::from_secs(3));

    assert_eq!(config.delay_for(0), Duration::from_secs(1));
    assert_eq!(config.delay_for(1), Duration::from_secs(2));
    assert_eq!(config.delay_for(2), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_callback_fires_once() {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let mut manager = TimeoutManager::new(Duration::from_secs(1), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    manager.start_monitoring("never_completes");
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(manager.has_fired());
    manager.stop_monitoring().await;
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_attempt_is_retried() {
    let adapter = Arc::new(MockAdapter::new());
    adapter.push_delayed("too late", Duration::from_secs(10));
    adapter.push_output("12345.6 6789.0");

    let report = CommandTask::new(shell(&adapter))
        .with_timeout(Duration::from_secs(1))
        .with_retry(RetryConfig::immediate(1))
        .run()
        .await;

    assert!(report.success);
    assert_eq!(report.retries, 1);
    assert_eq!(adapter.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_terminal_after_retries() {
    let adapter = Arc::new(MockAdapter::new());
    adapter.push_delayed("late", Duration::from_secs(10));
    adapter.push_delayed("late", Duration::from_secs(10));

    let (tx, rx) = oneshot::channel();
    let report = CommandTask::new(shell(&adapter))
        .with_timeout(Duration::from_secs(1))
        .with_retry(RetryConfig::immediate(1))
        .on_complete(move |_, result| {
            let _ = tx.send(result);
        })
        .run()
        .await;

    assert!(!report.success);
    assert_eq!(report.state, TaskState::Completed);
    assert_eq!(report.retries, 1);
    assert_eq!(report.error.as_deref(), Some("Command timeout after 1.0 seconds"));
    assert!(rx.await.unwrap().is_failure());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_run() {
    let adapter = Arc::new(MockAdapter::new());
    adapter.push_delayed("never seen", Duration::from_secs(10));

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let task = CommandTask::new(shell(&adapter))
        .with_timeout(Duration::from_secs(30))
        .with_retry(RetryConfig::immediate(3))
        .on_complete(move |_, result| {
            assert_eq!(result.error(), Some("Task cancelled"));
            counter.fetch_add(1, Ordering::SeqCst);
        });
    let handle = task.handle();
    let running = tokio::spawn(task.run());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.state(), TaskState::Running);
    handle.cancel();

    let report = running.await.unwrap();
    assert_eq!(report.state, TaskState::Cancelled);
    assert_eq!(report.error.as_deref(), Some("Task cancelled"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(adapter.call_count(), 1);
}

/// Delivers results stamped with another command's identity.
struct ImpostorCommand {
    base: CommandBase,
    stamp: Option<CommandIdentity>,
}

impl_command_meta!(ImpostorCommand, CommandKind::Shell);

#[async_trait]
impl Command for ImpostorCommand {
    type Output = String;

    fn base(&self) -> &CommandBase {
        &self.base
    }

    fn shell_command(&self) -> String {
        "getprop ro.serialno".to_string()
    }

    fn handle_response(&self, lines: &[String]) -> CommandResult<String> {
        CommandResult::success(lines.join("\n"))
    }

    async fn execute_async(&self, callback: ResultCallback<String>) {
        let issuer = self.stamp.unwrap_or_else(|| self.identity());
        callback(CommandResult::success("stale-serial".to_string()).with_issuer(issuer));
    }
}

#[tokio::test]
async fn test_result_from_other_command_is_discarded() {
    let adapter = Arc::new(MockAdapter::new());
    let a = ImpostorCommand {
        base: CommandBase::new(adapter.clone()),
        stamp: None,
    };
    let b = ImpostorCommand {
        base: CommandBase::new(adapter.clone()),
        stamp: Some(a.identity()),
    };
    assert_ne!(a.identity(), b.identity());

    let (tx, rx) = oneshot::channel();
    let report = CommandTask::new(b)
        .with_timeout(Duration::from_secs(5))
        .on_complete(move |_, result| {
            let _ = tx.send(result);
        })
        .run()
        .await;

    let delivered = rx.await.unwrap();
    assert!(!report.success);
    assert!(delivered.is_failure());
    assert_eq!(delivered.data(), None);

    // The same command type with its own identity goes through.
    let report = CommandTask::new(a).run().await;
    assert!(report.success);
}

#[tokio::test]
async fn test_pool_runs_submitted_tasks() {
    let adapter = Arc::new(MockAdapter::new());
    adapter.on_command("uptime", "up 2 days");
    let pool = WorkerPool::new(WorkerPoolConfig { max_concurrent: 2 });

    let handles: Vec<_> = (0..4)
        .map(|_| pool.submit(CommandTask::new(shell(&adapter))))
        .collect();

    for handle in handles {
        let report = handle.await.unwrap();
        assert!(report.success);
        assert_eq!(report.kind, CommandKind::Shell);
    }
    assert_eq!(adapter.call_count(), 4);
}

#[tokio::test]
async fn test_component_mismatch_ends_task_without_retry() {
    let adapter = Arc::new(MockAdapter::new());
    for _ in 0..3 {
        adapter.push_output("Calling remote procedure: `com.harman.other.Thing`\nReceived call result:\n{\"pos_args\": [0]}");
    }

    let report = CommandTask::new(SymphonyGroupCommand::new(adapter.clone()))
        .with_retry(RetryConfig::immediate(2))
        .run()
        .await;

    assert!(!report.success);
    assert_eq!(report.state, TaskState::Completed);
    assert_eq!(report.retries, 0);
    assert!(report.error.unwrap_or_default().contains("component mismatch"));
    assert_eq!(adapter.call_count(), 1);
}

#[tokio::test]
async fn test_malformed_json_ends_task_without_retry() {
    let adapter = Arc::new(MockAdapter::new());
    for _ in 0..3 {
        adapter.push_output(
            "Calling remote procedure: `com.harman.system.getDevInfoDynamic`\nReceived call result:\n{nam_args",
        );
    }

    let report = CommandTask::new(GetDeviceInfoCommand::new(adapter.clone()))
        .with_retry(RetryConfig::immediate(2))
        .run()
        .await;

    assert!(!report.success);
    assert_eq!(report.retries, 0);
    assert!(report.error.unwrap_or_default().contains("JSON decode error"));
    assert_eq!(adapter.call_count(), 1);
}

#[tokio::test]
async fn test_transport_failure_is_still_retried() {
    let adapter = Arc::new(MockAdapter::new());
    adapter.push_no_output();
    adapter.push_output("up 2 days");

    let report = CommandTask::new(shell(&adapter))
        .with_retry(RetryConfig::immediate(2))
        .run()
        .await;

    assert!(report.success);
    assert_eq!(report.retries, 1);
    assert_eq!(adapter.call_count(), 2);
}

#[tokio::test]
async fn test_pool_delivers_results_to_callbacks() {
    let adapter = Arc::new(MockAdapter::new());
    adapter.on_command("uptime", "up 2 days");
    let pool = WorkerPool::new(WorkerPoolConfig { max_concurrent: 2 });
    let delivered = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let delivered = delivered.clone();
            let task = CommandTask::new(shell(&adapter)).on_complete(move |_, result| {
                assert!(result.is_success());
                delivered.fetch_add(1, Ordering::SeqCst);
            });
            pool.submit(task)
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().success);
    }
    assert_eq!(delivered.load(Ordering::SeqCst), 3);
}
