use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use qsmon_core::{Event, EventManager};

use super::{successful_output, unexpected_output};
use crate::command::{CommandKind, CommandMeta};
use crate::commands::{PreferenceData, SymphonyStatus};
use crate::handler::{ProcessorError, ResultProcessor};
use crate::output::CommandOutput;
use crate::result::CommandResult;

const HANDLED: [CommandKind; 4] = [
    CommandKind::PreferenceData,
    CommandKind::SymphonyStatus,
    CommandKind::SymphonyGroup,
    CommandKind::SymphonyVolumeAdd,
];

/// Q-Symphony is considered active only with these two values.
const QS_ACTIVE: &str = "On";
const ACM_PLAYING: &str = "PLAY";

/// Cached Q-Symphony and ACM state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorState {
    pub qs_state: String,
    pub acm_service_state: String,
    /// Last combined state emitted, "On", "Off" or "Unknown".
    pub symphony_state: String,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            qs_state: "Off".to_string(),
            acm_service_state: "N/A".to_string(),
            symphony_state: "Unknown".to_string(),
        }
    }
}

impl MonitorState {
    fn combined(&self) -> &'static str {
        if self.qs_state == QS_ACTIVE && self.acm_service_state == ACM_PLAYING {
            "On"
        } else {
            "Off"
        }
    }
}

fn mode_type_display(mode_type: &str) -> String {
    match mode_type {
        "Symphony" => "Normal".to_string(),
        "Symphony Lite" => "Lite".to_string(),
        other => other.to_string(),
    }
}

/// Tracks Q-Symphony, ACM and multiroom state for the default monitor view.
pub struct DefaultMonitorProcessor {
    events: Arc<EventManager>,
    state: Mutex<MonitorState>,
}

impl DefaultMonitorProcessor {
    pub const FEATURE: &'static str = "DefaultMonitor";

    pub fn new(events: Arc<EventManager>) -> Self {
        Self {
            events,
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub fn current_state(&self) -> MonitorState {
        self.state.lock().clone()
    }

    pub fn reset(&self) {
        *self.state.lock() = MonitorState::default();
    }

    pub fn is_symphony_active(&self) -> bool {
        self.state.lock().combined() == "On"
    }

    fn on_symphony_status(&self, status: &SymphonyStatus) {
        let acm_service_state = {
            let mut state = self.state.lock();
            state.qs_state = status.qs_state.clone();
            state.acm_service_state.clone()
        };
        self.events.emit(Event::SymphonyStatusUpdated {
            qs_state: status.qs_state.clone(),
            sound_mode: status.sound_mode.clone(),
            mode_type_display: mode_type_display(&status.mode_type),
        });
        self.events.emit(Event::QsStateChanged {
            qs_state: status.qs_state.clone(),
            acm_service_state,
        });
        self.check_combined_state();
    }

    fn on_preference_data(&self, data: &PreferenceData) {
        let qs_state = {
            let mut state = self.state.lock();
            state.acm_service_state = data.acm_service_state.clone();
            state.qs_state.clone()
        };
        self.events.emit(Event::PreferenceDataUpdated {
            acm_service_state: data.acm_service_state.clone(),
            multiroom_grouptype: data.multiroom_grouptype.clone(),
            multiroom_mode: data.multiroom_mode.clone(),
        });
        self.events.emit(Event::QsStateChanged {
            qs_state,
            acm_service_state: data.acm_service_state.clone(),
        });
        self.check_combined_state();
    }

    fn check_combined_state(&self) {
        let changed = {
            let mut state = self.state.lock();
            let current = state.combined();
            if state.symphony_state == current {
                None
            } else {
                tracing::info!(from = %state.symphony_state, to = current, "Symphony state changed");
                state.symphony_state = current.to_string();
                Some(current)
            }
        };
        if let Some(current) = changed {
            self.events.emit(Event::SymphonyGroupStateChanged {
                state: current.to_string(),
            });
        }
    }
}

impl ResultProcessor for DefaultMonitorProcessor {
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

        match (command.kind(), output) {
            (CommandKind::PreferenceData, CommandOutput::PreferenceData(data)) => {
                self.on_preference_data(data);
            }
            (CommandKind::SymphonyStatus, CommandOutput::SymphonyStatus(status)) => {
                self.on_symphony_status(status);
            }
            (CommandKind::SymphonyGroup, CommandOutput::SymphonyGroup(group_mode)) => {
                self.events.emit(Event::SymphonyGroupUpdated {
                    group_mode: group_mode.clone(),
                });
            }
            (CommandKind::SymphonyVolumeAdd, CommandOutput::SymphonyVolume(volume)) => {
                self.events.emit(Event::SymphonyVolumeUpdated {
                    volume: Some(*volume),
                });
            }
            (kind, _) if !HANDLED.contains(&kind) => {
                return Err(ProcessorError::UnexpectedKind {
                    processor: self.name().to_string(),
                    kind,
                });
            }
            _ => return Err(unexpected_output(command)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::CommandIdentity;
    use qsmon_core::{event_handler, topics};

    struct Meta(CommandKind);

    impl CommandMeta for Meta {
        fn kind(&self) -> CommandKind {
            self.0
        }

        fn identity(&self) -> CommandIdentity {
            CommandIdentity::next()
        }
    }

    fn recorder(bus: &EventManager, topic: &str) -> Arc<Mutex<Vec<Event>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.register_event_handler(
            topic,
            event_handler(move |event| {
                sink.lock().push(event.clone());
                Ok(())
            }),
        );
        seen
    }

    fn status(qs: &str, mode: &str) -> CommandResult<CommandOutput> {
        CommandResult::success(CommandOutput::SymphonyStatus(SymphonyStatus {
            qs_state: qs.to_string(),
            sound_mode: "Music".to_string(),
            mode_type: mode.to_string(),
        }))
    }

    fn preference(acm: &str) -> CommandResult<CommandOutput> {
        CommandResult::success(CommandOutput::PreferenceData(PreferenceData {
            acm_service_state: acm.to_string(),
            ..PreferenceData::default()
        }))
    }

    #[test]
    fn test_symphony_status_events() {
        let bus = Arc::new(EventManager::new());
        let updates = recorder(&bus, topics::SYMPHONY_STATUS_UPDATED);
        let processor = DefaultMonitorProcessor::new(bus.clone());

        processor
            .process_command_result(&Meta(CommandKind::SymphonyStatus), &status("On", "Symphony Lite"))
            .unwrap();

        assert_eq!(
            updates.lock()[0],
            Event::SymphonyStatusUpdated {
                qs_state: "On".into(),
                sound_mode: "Music".into(),
                mode_type_display: "Lite".into(),
            }
        );
        assert_eq!(processor.current_state().qs_state, "On");
    }

    #[test]
    fn test_combined_state_changes_only_on_transition() {
        let bus = Arc::new(EventManager::new());
        let transitions = recorder(&bus, topics::SYMPHONY_GROUP_STATE_CHANGED);
        let processor = DefaultMonitorProcessor::new(bus.clone());

        let sym = Meta(CommandKind::SymphonyStatus);
        let pref = Meta(CommandKind::PreferenceData);
        processor.process_command_result(&sym, &status("On", "Symphony")).unwrap();
        processor.process_command_result(&pref, &preference("PLAY")).unwrap();
        processor.process_command_result(&pref, &preference("PLAY")).unwrap();
        processor.process_command_result(&sym, &status("Off", "Symphony")).unwrap();

        let states: Vec<_> = transitions
            .lock()
            .iter()
            .map(|e| e.payload()["state"].clone())
            .collect();
        assert_eq!(states, vec!["Off", "On", "Off"]);
        assert!(!processor.is_symphony_active());
    }

    #[test]
    fn test_failed_result_emits_nothing() {
        let bus = Arc::new(EventManager::new());
        let updates = recorder(&bus, topics::SYMPHONY_GROUP_UPDATED);
        let processor = DefaultMonitorProcessor::new(bus);

        let failed = CommandResult::<CommandOutput>::failure("timeout");
        processor
            .process_command_result(&Meta(CommandKind::SymphonyGroup), &failed)
            .unwrap();
        assert!(updates.lock().is_empty());
    }

    #[test]
    fn test_mismatched_output_is_an_error() {
        let processor = DefaultMonitorProcessor::new(Arc::new(EventManager::new()));
        let result = CommandResult::success(CommandOutput::Confirmed(true));
        assert!(matches!(
            processor.process_command_result(&Meta(CommandKind::SymphonyGroup), &result),
            Err(ProcessorError::UnexpectedOutput { .. })
        ));
        assert!(matches!(
            processor.process_command_result(&Meta(CommandKind::Reboot), &result),
            Err(ProcessorError::UnexpectedKind { .. })
        ));
    }
}
