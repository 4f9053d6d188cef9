//! Result processors that turn command results into bus events.
//!
//! Provides:
//! - [`DefaultMonitorProcessor`] - Q-Symphony, ACM and multiroom state
//! - [`NetworkMonitorProcessor`] - network interface state
//! - [`CrashMonitorProcessor`] - newly appeared core dumps
//! - [`DeviceInfoProcessor`] - dynamic device information
//! - [`RebootProcessor`] - reboot requests and completion
//!
//! Failed results are logged and skipped; only successful outputs produce
//! events.

mod crash;
mod default_monitor;
mod device_info;
mod network;
mod reboot;

pub use crash::CrashMonitorProcessor;
pub use default_monitor::{DefaultMonitorProcessor, MonitorState};
pub use device_info::DeviceInfoProcessor;
pub use network::NetworkMonitorProcessor;
pub use reboot::RebootProcessor;

use crate::command::CommandMeta;
use crate::handler::ProcessorError;
use crate::output::CommandOutput;
use crate::result::CommandResult;

/// Successful output of `result`, or `None` after logging the failure.
fn successful_output<'a>(
    processor: &str,
    command: &dyn CommandMeta,
    result: &'a CommandResult<CommandOutput>,
) -> Option<&'a CommandOutput> {
    match result.data() {
        Some(output) => Some(output),
        None => {
            tracing::debug!(
                processor,
                command = command.name(),
                error = result.error().unwrap_or_default(),
                "Skipping failed result"
            );
            None
        }
    }
}

fn unexpected_output(command: &dyn CommandMeta) -> ProcessorError {
    ProcessorError::UnexpectedOutput {
        kind: command.kind(),
    }
}
