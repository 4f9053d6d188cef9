//! System-level commands: crash dumps, reboot and raw shell.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandBase, CommandError, CommandKind, CommandMeta};
use crate::executor::DeviceAdapter;
use crate::impl_command_meta;
use crate::result::CommandResult;
use crate::retry::RetryConfig;

pub const COREDUMP_DIR: &str = "/data/var/lib/systemd/systemd-coredump/";

/// Core dump files found on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreDumpListing {
    pub files: Vec<String>,
}

impl CoreDumpListing {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_core_file(name: &str) -> bool {
    name.starts_with("core.")
        || name.ends_with(".core")
        || name.to_lowercase().contains("core")
}

/// Keep the `ls` entries that look like core dumps.
pub fn filter_core_files(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with("ls:"))
        .filter(|line| is_core_file(line))
        .map(str::to_string)
        .collect()
}

/// List the systemd coredump directory.
pub struct CoredumpMonitorCommand {
    base: CommandBase,
}

impl CoredumpMonitorCommand {
    pub fn new(adapter: Arc<dyn DeviceAdapter>) -> Self {
        Self {
            base: CommandBase::new(adapter),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.base = self.base.with_retry(retry);
        self
    }
}

impl_command_meta!(CoredumpMonitorCommand, CommandKind::CoredumpMonitor);

impl Command for CoredumpMonitorCommand {
    type Output = CoreDumpListing;

    fn base(&self) -> &CommandBase {
        &self.base
    }

    fn shell_command(&self) -> String {
        format!("ls {}", COREDUMP_DIR)
    }

    fn handle_response(&self, lines: &[String]) -> CommandResult<CoreDumpListing> {
        let files = filter_core_files(lines);
        if !files.is_empty() {
            tracing::info!(count = files.len(), "Core dump files present");
        }
        CommandResult::success(CoreDumpListing { files })
    }

    // An empty directory listing is a valid answer.
    fn process_output(&self, output: Option<String>) -> CommandResult<CoreDumpListing> {
        match output {
            Some(text) if !text.trim().is_empty() => {
                let lines = crate::executor::split_lines(&text);
                self.handle_response(&lines).with_issuer(self.identity())
            }
            _ => CommandResult::success(CoreDumpListing::default()).with_issuer(self.identity()),
        }
    }
}

/// Reboot the device, optionally syncing file systems first.
pub struct RebootCommand {
    base: CommandBase,
    sync_before_reboot: bool,
}

impl RebootCommand {
    pub fn new(adapter: Arc<dyn DeviceAdapter>) -> Self {
        Self {
            base: CommandBase::new(adapter).with_retry(RetryConfig::none()),
            sync_before_reboot: true,
        }
    }

    pub fn with_sync(mut self, sync_before_reboot: bool) -> Self {
        self.sync_before_reboot = sync_before_reboot;
        self
    }

    pub fn sync_before_reboot(&self) -> bool {
        self.sync_before_reboot
    }
}

impl_command_meta!(RebootCommand, CommandKind::Reboot);

impl Command for RebootCommand {
    type Output = bool;

    fn base(&self) -> &CommandBase {
        &self.base
    }

    fn shell_command(&self) -> String {
        if self.sync_before_reboot {
            "sync && reboot -f".to_string()
        } else {
            "reboot -f".to_string()
        }
    }

    fn handle_response(&self, _lines: &[String]) -> CommandResult<bool> {
        CommandResult::success(true)
    }

    // The connection drops before any output arrives.
    fn process_output(&self, _output: Option<String>) -> CommandResult<bool> {
        tracing::info!(sync = self.sync_before_reboot, "Reboot issued");
        CommandResult::success(true).with_issuer(self.identity())
    }
}

/// Arbitrary shell command returning its output lines.
pub struct ShellCommand {
    base: CommandBase,
    command: String,
}

impl ShellCommand {
    pub fn new(adapter: Arc<dyn DeviceAdapter>, command: impl Into<String>) -> Result<Self, CommandError> {
        let command = command.into();
        crate::command::validate_shell_command(&command)?;
        Ok(Self {
            base: CommandBase::new(adapter),
            command,
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.base = self.base.with_retry(retry);
        self
    }
}

impl_command_meta!(ShellCommand, CommandKind::Shell);

impl Command for ShellCommand {
    type Output = Vec<String>;

    fn base(&self) -> &CommandBase {
        &self.base
    }

    fn shell_command(&self) -> String {
        self.command.clone()
    }

    fn handle_response(&self, lines: &[String]) -> CommandResult<Vec<String>> {
        CommandResult::success(lines.to_vec())
    }
}
