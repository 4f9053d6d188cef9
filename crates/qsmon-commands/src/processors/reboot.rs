use std::sync::Arc;

use qsmon_core::{Event, EventManager};

use crate::command::{CommandKind, CommandMeta};
use crate::handler::{ProcessorError, ResultProcessor};
use crate::output::CommandOutput;
use crate::result::CommandResult;

const HANDLED: [CommandKind; 1] = [CommandKind::Reboot];

/// Announces reboot requests and reports when the reboot command finished.
///
/// Reboots are issued on demand, so this feature is never part of a polling
/// catalogue.
pub struct RebootProcessor {
    events: Arc<EventManager>,
}

impl RebootProcessor {
    pub const FEATURE: &'static str = "Reboot";

    pub fn new(events: Arc<EventManager>) -> Self {
        Self { events }
    }

    /// Publish that a reboot is about to be sent.
    pub fn request(&self, sync_before_reboot: bool) {
        tracing::info!(sync_before_reboot, "Reboot requested");
        self.events.emit(Event::RebootRequested { sync_before_reboot });
    }
}

impl ResultProcessor for RebootProcessor {
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
        let success = match result.data() {
            Some(CommandOutput::Confirmed(sent)) => *sent,
            Some(_) => {
                return Err(ProcessorError::UnexpectedOutput {
                    kind: command.kind(),
                })
            }
            None => {
                tracing::warn!(
                    command = command.name(),
                    error = result.error().unwrap_or_default(),
                    "Reboot command failed"
                );
                false
            }
        };
        self.events.emit(Event::RebootCompleted { success });
        Ok(())
    }
}
