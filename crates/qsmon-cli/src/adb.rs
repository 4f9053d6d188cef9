//! `adb`-backed device adapter.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::process::Command;

use qsmon_commands::{AdapterError, DeviceAdapter};
use qsmon_core::DeviceConfig;

/// Runs shell commands on a device through `adb shell`.
///
/// Connectivity is cached; call [`refresh`](Self::refresh) to re-check it
/// with `adb get-state`.
pub struct AdbShellAdapter {
    adb_path: String,
    serial: Option<String>,
    name: String,
    connected: AtomicBool,
}

impl AdbShellAdapter {
    pub fn new(adb_path: impl Into<String>, serial: Option<String>) -> Self {
        let name = serial.clone().unwrap_or_else(|| "default".to_string());
        Self {
            adb_path: adb_path.into(),
            serial,
            name,
            connected: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(config.adb_path.clone(), config.serial.clone())
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// Arguments selecting the device, followed by `rest`.
    fn args<'a>(&'a self, rest: &[&'a str]) -> Vec<&'a str> {
        let mut args = Vec::with_capacity(rest.len() + 2);
        if let Some(serial) = &self.serial {
            args.push("-s");
            args.push(serial.as_str());
        }
        args.extend_from_slice(rest);
        args
    }

    /// Re-check connectivity. Returns the new state.
    pub async fn refresh(&self) -> bool {
        let output = Command::new(&self.adb_path)
            .args(self.args(&["get-state"]))
            .stdin(Stdio::null())
            .output()
            .await;

        let connected = match output {
            Ok(output) => output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "device",
            Err(e) => {
                tracing::warn!(adb = %self.adb_path, error = %e, "Failed to run adb");
                false
            }
        };

        let previous = self.connected.swap(connected, Ordering::SeqCst);
        if previous != connected {
            tracing::info!(device = %self.name, connected, "Device connection changed");
        }
        connected
    }
}

#[async_trait]
impl DeviceAdapter for AdbShellAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn shell(&self, command: &str) -> Result<Option<String>, AdapterError> {
        tracing::debug!(device = %self.name, command, "adb shell");
        let output = Command::new(&self.adb_path)
            .args(self.args(&["shell", command]))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AdapterError::Spawn(format!("{}: {}", self.adb_path, e)))?;

        if !output.status.success() {
            return Err(AdapterError::Exit {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(stdout))
        }
    }
}
