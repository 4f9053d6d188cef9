use std::sync::Arc;

use qsmon_core::{Event, EventManager};

use super::{successful_output, unexpected_output};
use crate::command::{CommandKind, CommandMeta};
use crate::handler::{ProcessorError, ResultProcessor};
use crate::output::CommandOutput;
use crate::result::CommandResult;

const HANDLED: [CommandKind; 1] = [CommandKind::GetDeviceInfo];

/// Publishes refreshed device information.
pub struct DeviceInfoProcessor {
    events: Arc<EventManager>,
}

impl DeviceInfoProcessor {
    pub const FEATURE: &'static str = "DeviceInfo";

    pub fn new(events: Arc<EventManager>) -> Self {
        Self { events }
    }
}

impl ResultProcessor for DeviceInfoProcessor {
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
        let CommandOutput::DeviceInfo(info) = output else {
            return Err(unexpected_output(command));
        };
        self.events.emit(Event::DeviceInfoUpdated { info: info.clone() });
        Ok(())
    }
}
