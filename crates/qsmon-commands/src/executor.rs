//! Device adapter seam and the shell executor built on it.
//!
//! [`DeviceAdapter`] is the narrow interface to whatever transport reaches
//! the device (adb, a serial console, a test double). [`CommandExecutor`]
//! wraps an adapter and never fails: transport errors are logged and
//! reported as "no output".

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

/// Device adapter error types.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Device not connected")]
    NotConnected,

    #[error("Failed to spawn transport: {0}")]
    Spawn(String),

    #[error("Shell command exited with status {code}: {stderr}")]
    Exit { code: i32, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

/// Transport to a device shell.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Identifier used in logs, e.g. the device serial.
    fn name(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Run `command` in the device shell.
    ///
    /// `Ok(None)` means the command produced no output.
    async fn shell(&self, command: &str) -> Result<Option<String>, AdapterError>;
}

/// Shell execution over a [`DeviceAdapter`].
#[derive(Clone)]
pub struct CommandExecutor {
    adapter: Arc<dyn DeviceAdapter>,
}

impl CommandExecutor {
    pub fn new(adapter: Arc<dyn DeviceAdapter>) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &Arc<dyn DeviceAdapter> {
        &self.adapter
    }

    pub fn device_name(&self) -> &str {
        self.adapter.name()
    }

    pub fn is_connected(&self) -> bool {
        self.adapter.is_connected()
    }

    /// Run `command`, surfacing transport errors.
    pub async fn try_execute(&self, command: &str) -> Result<Option<String>, AdapterError> {
        self.adapter.shell(command).await
    }

    /// Run `command`. Transport errors are logged and returned as `None`.
    pub async fn execute(&self, command: &str) -> Option<String> {
        match self.adapter.shell(command).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(
                    device = self.adapter.name(),
                    command,
                    error = %e,
                    "Shell execution failed"
                );
                None
            }
        }
    }

    /// Run `command` on a background task and hand the output to `callback`.
    pub fn execute_async<F>(&self, command: &str, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Option<String>) + Send + 'static,
    {
        let executor = self.clone();
        let command = command.to_string();
        tokio::spawn(async move {
            let output = executor.execute(&command).await;
            callback(output);
        })
    }
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("device", &self.adapter.name())
            .finish()
    }
}

/// Split raw shell output into response lines.
///
/// Surrounding whitespace is trimmed first; empty output yields no lines.
pub fn split_lines(output: &str) -> Vec<String> {
    output.trim().lines().map(str::to_string).collect()
}
