//! Command contract.
//!
//! A command is one remote shell operation plus the parser for its output.
//! Concrete commands implement [`Command`]: they produce the shell string
//! and turn the response lines into a typed [`CommandResult`]. Validation,
//! retrying, identity tagging and panic containment come from the trait's
//! provided methods.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::executor::{split_lines, AdapterError, CommandExecutor, DeviceAdapter};
use crate::result::{CommandIdentity, CommandResult};
use crate::retry::{RetryConfig, RetryPolicy};

/// Every concrete command type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    GetDeviceInfo,
    SaveDeviceName,
    UpdateDeviceName,
    SymphonyStatus,
    SymphonyGroup,
    SymphonyVolumeAdd,
    SurroundSpeakerRemap,
    PreferenceData,
    NetworkInterface,
    CoredumpMonitor,
    Reboot,
    Shell,
}

impl CommandKind {
    pub const ALL: [CommandKind; 12] = [
        CommandKind::GetDeviceInfo,
        CommandKind::SaveDeviceName,
        CommandKind::UpdateDeviceName,
        CommandKind::SymphonyStatus,
        CommandKind::SymphonyGroup,
        CommandKind::SymphonyVolumeAdd,
        CommandKind::SurroundSpeakerRemap,
        CommandKind::PreferenceData,
        CommandKind::NetworkInterface,
        CommandKind::CoredumpMonitor,
        CommandKind::Reboot,
        CommandKind::Shell,
    ];

    /// snake_case name, as accepted by the command factory.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::GetDeviceInfo => "get_device_info",
            CommandKind::SaveDeviceName => "save_device_name",
            CommandKind::UpdateDeviceName => "update_device_name",
            CommandKind::SymphonyStatus => "symphony_status",
            CommandKind::SymphonyGroup => "symphony_group",
            CommandKind::SymphonyVolumeAdd => "symphony_volume_add",
            CommandKind::SurroundSpeakerRemap => "surround_speaker_remap",
            CommandKind::PreferenceData => "preference_data",
            CommandKind::NetworkInterface => "network_interface",
            CommandKind::CoredumpMonitor => "coredump_monitor",
            CommandKind::Reboot => "reboot",
            CommandKind::Shell => "shell",
        }
    }

    /// Command type name used in logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            CommandKind::GetDeviceInfo => "GetDeviceInfoCommand",
            CommandKind::SaveDeviceName => "SaveDeviceNameCommand",
            CommandKind::UpdateDeviceName => "UpdateDeviceNameCommand",
            CommandKind::SymphonyStatus => "SymphonyStatusCommand",
            CommandKind::SymphonyGroup => "SymphonyGroupCommand",
            CommandKind::SymphonyVolumeAdd => "SymphonyVolumeAddCommand",
            CommandKind::SurroundSpeakerRemap => "SurroundSpeakerRemapCommand",
            CommandKind::PreferenceData => "PreferenceDataCommand",
            CommandKind::NetworkInterface => "NetworkInterfaceCommand",
            CommandKind::CoredumpMonitor => "CoredumpMonitorCommand",
            CommandKind::Reboot => "RebootCommand",
            CommandKind::Shell => "ShellCommand",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl FromStr for CommandKind {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s || k.type_name() == s)
            .ok_or_else(|| CommandError::UnknownKind(s.to_string()))
    }
}

/// Engine-level command errors.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Device not connected")]
    NotConnected,

    #[error("Shell command is empty")]
    EmptyShellCommand,

    #[error("No output from shell command")]
    NoOutput,

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("Command timeout after {:.1} seconds", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unknown command kind: {0}")]
    UnknownKind(String),

    #[error("Exception during {stage}: {message}")]
    Panicked { stage: &'static str, message: String },
}

impl CommandError {
    /// Transient failures worth another attempt.
    ///
    /// `NoOutput` counts as transient: the executor reports swallowed
    /// transport errors as no output.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CommandError::NotConnected
                | CommandError::NoOutput
                | CommandError::Adapter(_)
                | CommandError::Timeout(_)
        )
    }
}

/// Object-safe view of a command, used for routing.
pub trait CommandMeta: Send + Sync {
    fn kind(&self) -> CommandKind;

    fn identity(&self) -> CommandIdentity;

    fn name(&self) -> &'static str {
        self.kind().type_name()
    }
}

/// Receives the result of an asynchronous execution.
pub type ResultCallback<T> = Box<dyn FnOnce(CommandResult<T>) + Send>;

/// State shared by every concrete command.
#[derive(Debug, Clone)]
pub struct CommandBase {
    identity: CommandIdentity,
    executor: CommandExecutor,
    retry: RetryConfig,
}

impl CommandBase {
    pub fn new(adapter: Arc<dyn DeviceAdapter>) -> Self {
        Self {
            identity: CommandIdentity::next(),
            executor: CommandExecutor::new(adapter),
            retry: RetryConfig::default(),
        }
    }

    /// Retry settings for the synchronous [`Command::execute`] path.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn identity(&self) -> CommandIdentity {
        self.identity
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// A fresh retry policy for one execution loop.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry.clone())
    }
}

/// Diagnostic snapshot of a command.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    pub command_name: &'static str,
    pub kind: CommandKind,
    pub identity: CommandIdentity,
    pub device: String,
    pub device_connected: bool,
    pub shell_command: String,
}

/// Reject empty or blank shell strings.
pub fn validate_shell_command(command: &str) -> Result<(), CommandError> {
    if command.trim().is_empty() {
        return Err(CommandError::EmptyShellCommand);
    }
    Ok(())
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One remote shell operation.
#[async_trait]
pub trait Command: CommandMeta {
    type Output: Send + 'static;

    fn base(&self) -> &CommandBase;

    /// Text sent to the device shell.
    fn shell_command(&self) -> String;

    /// Parse raw output lines. Must not panic; errors become failures.
    fn handle_response(&self, lines: &[String]) -> CommandResult<Self::Output>;

    /// Precondition checks run before any device call.
    fn validate(&self) -> Result<(), CommandError> {
        validate_shell_command(&self.shell_command())
    }

    fn execution_context(&self) -> ExecutionContext {
        let executor = self.base().executor();
        ExecutionContext {
            command_name: self.name(),
            kind: self.kind(),
            identity: self.identity(),
            device: executor.device_name().to_string(),
            device_connected: executor.is_connected(),
            shell_command: self.shell_command(),
        }
    }

    /// Turn raw shell output into a result tagged with this command's
    /// identity.
    fn process_output(&self, output: Option<String>) -> CommandResult<Self::Output> {
        let identity = self.identity();
        let Some(output) = output else {
            tracing::debug!(command = self.name(), "No output from shell command");
            return CommandResult::from_command_error(CommandError::NoOutput).with_issuer(identity);
        };

        let lines = split_lines(&output);
        match catch_unwind(AssertUnwindSafe(|| self.handle_response(&lines))) {
            Ok(result) => result.with_issuer(identity),
            Err(payload) => {
                let error = CommandError::Panicked {
                    stage: "response processing",
                    message: panic_message(payload.as_ref()),
                };
                tracing::error!(command = self.name(), error = %error, "Response handler panicked");
                CommandResult::from_command_error(error).with_issuer(identity)
            }
        }
    }

    /// Execute with the command's retry policy and wait for the result.
    ///
    /// Never fails outright: every error becomes a `Failure` result.
    async fn execute(&self) -> CommandResult<Self::Output> {
        let identity = self.identity();
        if let Err(e) = self.validate() {
            tracing::debug!(command = self.name(), error = %e, "Validation failed");
            return CommandResult::from_command_error(e).with_issuer(identity);
        }

        let shell = self.shell_command();
        let executor = self.base().executor().clone();
        let mut policy = self.base().retry_policy();

        let outcome = policy
            .execute_with_retry_if(
                self.name(),
                || {
                    let executor = executor.clone();
                    let shell = shell.clone();
                    async move {
                        if !executor.is_connected() {
                            return Err(CommandError::NotConnected);
                        }
                        let output = executor.try_execute(&shell).await?;
                        let result = self.process_output(output);
                        // The only retryable parse outcome is an empty response.
                        if result.is_retryable() {
                            return Err(CommandError::NoOutput);
                        }
                        Ok(result)
                    }
                },
                CommandError::is_retryable,
            )
            .await;

        match outcome {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(
                    command = self.name(),
                    retries = policy.current_retry_count(),
                    error = %e,
                    "Execution failed"
                );
                CommandResult::from_command_error(e).with_issuer(identity)
            }
        }
    }

    /// Execute once through the executor's background primitive and hand the
    /// tagged result to `callback`.
    async fn execute_async(&self, callback: ResultCallback<Self::Output>) {
        let identity = self.identity();
        if let Err(e) = self.validate() {
            callback(CommandResult::from_command_error(e).with_issuer(identity));
            return;
        }
        let executor = self.base().executor();
        if !executor.is_connected() {
            callback(CommandResult::from_command_error(CommandError::NotConnected).with_issuer(identity));
            return;
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        executor.execute_async(&self.shell_command(), move |output| {
            let _ = tx.send(output);
        });
        let output = rx.await.unwrap_or(None);
        callback(self.process_output(output));
    }
}

/// Implement [`CommandMeta`] for a command holding a `base: CommandBase`.
#[macro_export]
macro_rules! impl_command_meta {
    ($ty:ty, $kind:expr) => {
        impl $crate::command::CommandMeta for $ty {
            fn kind(&self) -> $crate::command::CommandKind {
                $kind
            }

            fn identity(&self) -> $crate::result::CommandIdentity {
                self.base.identity()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockAdapter;

    struct EchoCommand {
        base: CommandBase,
        text: String,
    }

    impl_command_meta!(EchoCommand, CommandKind::Shell);

    impl Command for EchoCommand {
        type Output = Vec<String>;

        fn base(&self) -> &CommandBase {
            &self.base
        }

        fn shell_command(&self) -> String {
            self.text.clone()
        }

        fn handle_response(&self, lines: &[String]) -> CommandResult<Vec<String>> {
            if lines.first().map(String::as_str) == Some("boom") {
                panic!("parser exploded");
            }
            CommandResult::success(lines.to_vec())
        }
    }

    fn echo(adapter: &Arc<MockAdapter>, text: &str, retry: RetryConfig) -> EchoCommand {
        EchoCommand {
            base: CommandBase::new(adapter.clone()).with_retry(retry),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in CommandKind::ALL {
            assert_eq!(kind.as_str().parse::<CommandKind>().unwrap(), kind);
            assert_eq!(kind.type_name().parse::<CommandKind>().unwrap(), kind);
        }
        assert!(matches!(
            "teleport".parse::<CommandKind>(),
            Err(CommandError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(CommandError::NotConnected.is_retryable());
        assert!(CommandError::NoOutput.is_retryable());
        assert!(CommandError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!CommandError::Protocol("x".into()).is_retryable());
        assert!(!CommandError::Parse("x".into()).is_retryable());
        assert!(!CommandError::EmptyShellCommand.is_retryable());
    }

    #[tokio::test]
    async fn test_execute_tags_result() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.push_output("a\nb");
        let cmd = echo(&adapter, "cat x", RetryConfig::none());

        let result = cmd.execute().await;
        assert_eq!(result.data(), Some(&vec!["a".to_string(), "b".to_string()]));
        assert!(result.is_from(cmd.identity()));
    }

    #[tokio::test]
    async fn test_blank_shell_command_is_rejected() {
        let adapter = Arc::new(MockAdapter::new());
        let cmd = echo(&adapter, "   ", RetryConfig::immediate(3));

        let result = cmd.execute().await;
        assert_eq!(result.error(), Some("Shell command is empty"));
        assert_eq!(adapter.call_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnected_device_is_retried_then_fails() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.set_connected(false);
        let cmd = echo(&adapter, "ls", RetryConfig::immediate(2));

        let result = cmd.execute().await;
        assert_eq!(result.error(), Some("Device not connected"));
        assert!(result.is_from(cmd.identity()));
    }

    #[tokio::test]
    async fn test_transport_error_is_retried() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.push_error(AdapterError::Other("usb glitch".into()));
        adapter.push_output("ok");
        let cmd = echo(&adapter, "ls", RetryConfig::immediate(1));

        let result = cmd.execute().await;
        assert_eq!(result.data(), Some(&vec!["ok".to_string()]));
        assert_eq!(adapter.call_count(), 2);
    }

    #[tokio::test]
    async fn test_no_output_is_retried_then_fails() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.push_no_output();
        let cmd = echo(&adapter, "ls", RetryConfig::immediate(2));

        let result = cmd.execute().await;
        assert_eq!(result.error(), Some("No output from shell command"));
        assert!(result.is_retryable());
        assert_eq!(adapter.call_count(), 3);
    }

    #[tokio::test]
    async fn test_parser_panic_is_not_retried() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.push_output("boom");
        adapter.push_output("ok");
        let cmd = echo(&adapter, "ls", RetryConfig::immediate(2));

        let result = cmd.execute().await;
        assert!(result.is_failure());
        assert!(!result.is_retryable());
        assert_eq!(adapter.call_count(), 1);
    }

    #[tokio::test]
    async fn test_parser_panic_becomes_failure() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.push_output("boom");
        let cmd = echo(&adapter, "ls", RetryConfig::none());

        let result = cmd.execute().await;
        let error = result.error().unwrap_or_default();
        assert!(error.contains("parser exploded"), "{error}");
        assert!(result.is_from(cmd.identity()));
    }

    #[tokio::test]
    async fn test_execute_async_invokes_callback() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.push_output("x");
        let cmd = echo(&adapter, "ls", RetryConfig::none());

        let (tx, rx) = tokio::sync::oneshot::channel();
        cmd.execute_async(Box::new(move |r| {
            let _ = tx.send(r);
        }))
        .await;
        let result = rx.await.unwrap();
        assert!(result.is_success());
        assert!(result.is_from(cmd.identity()));
    }

    #[tokio::test]
    async fn test_execute_async_disconnected() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.set_connected(false);
        let cmd = echo(&adapter, "ls", RetryConfig::none());

        let (tx, rx) = tokio::sync::oneshot::channel();
        cmd.execute_async(Box::new(move |r| {
            let _ = tx.send(r);
        }))
        .await;
        assert_eq!(rx.await.unwrap().error(), Some("Device not connected"));
        assert_eq!(adapter.call_count(), 0);
    }

    #[test]
    fn test_execution_context() {
        let adapter = Arc::new(MockAdapter::with_name("R58M"));
        let cmd = echo(&adapter, "uptime", RetryConfig::none());
        let ctx = cmd.execution_context();
        assert_eq!(ctx.command_name, "ShellCommand");
        assert_eq!(ctx.device, "R58M");
        assert!(ctx.device_connected);
        assert_eq!(ctx.shell_command, "uptime");
    }
}
