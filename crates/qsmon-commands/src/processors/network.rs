use std::sync::Arc;

use parking_lot::Mutex;

use qsmon_core::{Event, EventManager};

use super::{successful_output, unexpected_output};
use crate::command::{CommandKind, CommandMeta};
use crate::commands::NetworkInterfaceInfo;
use crate::handler::{ProcessorError, ResultProcessor};
use crate::output::CommandOutput;
use crate::result::CommandResult;

const HANDLED: [CommandKind; 1] = [CommandKind::NetworkInterface];

/// Publishes network interface refreshes.
pub struct NetworkMonitorProcessor {
    events: Arc<EventManager>,
    last: Mutex<Option<NetworkInterfaceInfo>>,
}

impl NetworkMonitorProcessor {
    pub const FEATURE: &'static str = "NetworkMonitor";

    pub fn new(events: Arc<EventManager>) -> Self {
        Self {
            events,
            last: Mutex::new(None),
        }
    }

    /// Most recent interface information.
    pub fn current(&self) -> Option<NetworkInterfaceInfo> {
        self.last.lock().clone()
    }
}

impl ResultProcessor for NetworkMonitorProcessor {
    fn name(&self) -> &str {
        Self::FEATURE
    }

    fn handled_kinds(&self) -> &[CommandKind] {
        &HANDLED
    }

    fn process_command_result(
        &self,
        command: &dyn CommandMeta,
        result: &CommandResult<CommandOutput>,
    ) -> Result<(), ProcessorError> {
        let Some(output) = successful_output(self.name(), command, result) else {
            return Ok(());
        };
        let CommandOutput::NetworkInterface(info) = output else {
            return Err(unexpected_output(command));
        };

        *self.last.lock() = Some(info.clone());
        self.events.emit(Event::NetworkInterfaceUpdated {
            ipv4: info.ipv4.clone(),
            ipv6: info.ipv6.clone(),
            flags: info.flags.clone(),
        });
        Ok(())
    }
}
