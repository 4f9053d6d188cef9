//! `ifconfig` parser for one interface.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandBase, CommandError, CommandKind};
use crate::executor::DeviceAdapter;
use crate::impl_command_meta;
use crate::result::CommandResult;
use crate::retry::RetryConfig;

pub const DEFAULT_INTERFACE: &str = "p2p0";

const NOT_AVAILABLE: &str = "N/A";

static INTERFACE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("valid regex"));
static FULL_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(UP)\b.*?\b(BROADCAST)\b.*?\b(RUNNING)\b.*?\b(MULTICAST)\b.*?\bMTU:(\d+)\b.*?\bMetric:(\d+)\b",
    )
    .expect("valid regex")
});
static SHORT_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(UP)\b.*?\bMTU:(\d+)\b.*?\bMetric:(\d+)\b").expect("valid regex")
});
static IPV4: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"inet\s+addr:(\d+\.\d+\.\d+\.\d+)").expect("valid regex"));
static IPV6_ADDR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"inet6\s+addr:\s*([0-9a-fA-F:]+/\d+)").expect("valid regex"));
static IPV6_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"inet6\s+([0-9a-fA-F:]+/\d+)").expect("valid regex"));

/// Parsed interface state. Missing fields are "N/A".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterfaceInfo {
    pub interface: String,
    pub ipv4: String,
    pub ipv6: String,
    pub status: String,
    pub flags: Vec<String>,
    pub mtu: String,
    pub metric: String,
}

impl NetworkInterfaceInfo {
    fn empty(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            ipv4: NOT_AVAILABLE.to_string(),
            ipv6: NOT_AVAILABLE.to_string(),
            status: NOT_AVAILABLE.to_string(),
            flags: Vec::new(),
            mtu: NOT_AVAILABLE.to_string(),
            metric: NOT_AVAILABLE.to_string(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.flags.iter().any(|f| f == "RUNNING")
    }
}

/// Parse `ifconfig` output for `interface`.
pub fn parse_ifconfig(interface: &str, lines: &[String]) -> NetworkInterfaceInfo {
    let mut info = NetworkInterfaceInfo::empty(interface);

    if let Some(line) = lines
        .iter()
        .find(|line| line.contains("UP") && line.contains("MTU:"))
    {
        if let Some(caps) = FULL_STATUS.captures(line) {
            info.status = caps[1].to_string();
            info.flags = vec!["RUNNING".to_string()];
            info.mtu = caps[5].to_string();
            info.metric = caps[6].to_string();
        } else if let Some(caps) = SHORT_STATUS.captures(line) {
            info.status = caps[1].to_string();
            info.mtu = caps[2].to_string();
            info.metric = caps[3].to_string();
            if line.contains("RUNNING") {
                info.flags = vec!["RUNNING".to_string()];
            }
        }
    }

    for line in lines {
        if info.ipv4 == NOT_AVAILABLE {
            if let Some(caps) = IPV4.captures(line) {
                info.ipv4 = caps[1].to_string();
            }
        }
        if info.ipv6 == NOT_AVAILABLE {
            let caps = IPV6_ADDR.captures(line).or_else(|| IPV6_BARE.captures(line));
            if let Some(caps) = caps {
                let addr = &caps[1];
                info.ipv6 = addr.split('/').next().unwrap_or(addr).to_string();
            }
        }
    }

    info
}

/// Interface status, addresses, MTU and metric.
pub struct NetworkInterfaceCommand {
    base: CommandBase,
    interface: String,
}

impl NetworkInterfaceCommand {
    /// `interface` must be non-empty and contain only `[A-Za-z0-9_-]`.
    pub fn new(adapter: Arc<dyn DeviceAdapter>, interface: &str) -> Result<Self, CommandError> {
        if interface.is_empty() {
            return Err(CommandError::InvalidParameter(
                "Interface name cannot be empty".to_string(),
            ));
        }
        if !INTERFACE_NAME.is_match(interface) {
            return Err(CommandError::InvalidParameter(format!(
                "Invalid interface name: {}",
                interface
            )));
        }
        Ok(Self {
            base: CommandBase::new(adapter),
            interface: interface.to_string(),
        })
    }

    pub fn with_default_interface(adapter: Arc<dyn DeviceAdapter>) -> Self {
        Self {
            base: CommandBase::new(adapter),
            interface: DEFAULT_INTERFACE.to_string(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.base = self.base.with_retry(retry);
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl_command_meta!(NetworkInterfaceCommand, CommandKind::NetworkInterface);

impl Command for NetworkInterfaceCommand {
    type Output = NetworkInterfaceInfo;

    fn base(&self) -> &CommandBase {
        &self.base
    }

    fn shell_command(&self) -> String {
        format!("ifconfig {}", self.interface)
    }

    fn handle_response(&self, lines: &[String]) -> CommandResult<NetworkInterfaceInfo> {
        if lines.is_empty() {
            return CommandResult::failure("No response from network interface command");
        }
        CommandResult::success(parse_ifconfig(&self.interface, lines))
    }
}
