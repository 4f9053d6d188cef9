use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;

use qsmon_core::{Event, EventManager};

use super::{successful_output, unexpected_output};
use crate::command::{CommandKind, CommandMeta};
use crate::handler::{ProcessorError, ResultProcessor};
use crate::output::CommandOutput;
use crate::result::CommandResult;

const HANDLED: [CommandKind; 1] = [CommandKind::CoredumpMonitor];

/// Emits [`Event::CrashDetected`] once per core file not seen before.
pub struct CrashMonitorProcessor {
    events: Arc<EventManager>,
    seen: Mutex<HashSet<String>>,
}

impl CrashMonitorProcessor {
    pub const FEATURE: &'static str = "CrashMonitor";

    pub fn new(events: Arc<EventManager>) -> Self {
        Self {
            events,
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn known_crash_count(&self) -> usize {
        self.seen.lock().len()
    }

    /// Forget seen files, e.g. after the dump directory was cleaned.
    pub fn reset(&self) {
        self.seen.lock().clear();
    }
}

impl ResultProcessor for CrashMonitorProcessor {
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
        let CommandOutput::CoreDumps(listing) = output else {
            return Err(unexpected_output(command));
        };

        let fresh: Vec<String> = {
            let mut seen = self.seen.lock();
            listing
                .files
                .iter()
                .filter(|file| seen.insert((*file).clone()))
                .cloned()
                .collect()
        };
        if fresh.is_empty() {
            return Ok(());
        }

        tracing::info!(count = fresh.len(), files = ?fresh, "Detected crash files");
        let timestamp = Utc::now().to_rfc3339();
        for file in &fresh {
            self.events.emit(Event::CrashDetected {
                crash_info: json!({
                    "crash_file": file,
                    "crash_files": listing.files,
                    "crash_count": listing.files.len(),
                    "timestamp": timestamp,
                }),
            });
        }
        Ok(())
    }
}
