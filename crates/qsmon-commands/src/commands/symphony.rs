//! Q-Symphony DSP audio settings.
//!
//! All four commands call `com.harman.dsp.GetAudioSetting` with a `pp ...`
//! query and read the answer from `pos_args`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::command::{Command, CommandBase, CommandKind};
use crate::executor::DeviceAdapter;
use crate::impl_command_meta;
use crate::result::CommandResult;
use crate::retry::RetryConfig;
use crate::wamp::{
    as_int, handle_wamp_response, pos_args, wamp_shell_command, WampCommand, WampCommandType,
};

pub const AUDIO_SETTING_COMPONENT: &str = "com.harman.dsp.GetAudioSetting";

pub fn sound_mode_text(value: i64) -> String {
    match value {
        0 => "Adaptive".to_string(),
        1 => "Game".to_string(),
        2 => "Surround".to_string(),
        3 => "Standard".to_string(),
        4 => "Music".to_string(),
        other => other.to_string(),
    }
}

pub fn group_mode_text(value: i64) -> &'static str {
    match value {
        0 => "Q-Symphony",
        1 => "Group",
        2 => "Stereo",
        _ => "Unknown",
    }
}

pub fn qs_state_text(value: i64) -> &'static str {
    match value {
        0 => "Off",
        1 => "On",
        _ => "Unknown",
    }
}

pub fn mode_type_text(value: i64) -> &'static str {
    match value {
        0 => "Symphony Lite",
        1 => "Symphony",
        _ => "Unknown",
    }
}

/// Decoded `pp symphony` answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymphonyStatus {
    pub qs_state: String,
    pub sound_mode: String,
    pub mode_type: String,
}

macro_rules! dsp_command {
    ($(#[$doc:meta])* $name:ident, $kind:expr, $query:literal) => {
        $(#[$doc])*
        pub struct $name {
            base: CommandBase,
        }

        impl $name {
            pub const QUERY: &'static str = $query;

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

        impl_command_meta!($name, $kind);
    };
}

macro_rules! dsp_wamp_plumbing {
    ($name:ident, $output:ty) => {
        impl Command for $name {
            type Output = $output;

            fn base(&self) -> &CommandBase {
                &self.base
            }

            fn shell_command(&self) -> String {
                wamp_shell_command(self)
            }

            fn handle_response(&self, lines: &[String]) -> CommandResult<$output> {
                handle_wamp_response(self, lines)
            }
        }
    };
}

dsp_command!(
    /// `pp symphony`: Q-Symphony on/off, sound mode and mode type.
    SymphonyStatusCommand,
    CommandKind::SymphonyStatus,
    "pp symphony"
);
dsp_wamp_plumbing!(SymphonyStatusCommand, SymphonyStatus);

impl WampCommand for SymphonyStatusCommand {
    fn command_type(&self) -> WampCommandType {
        WampCommandType::Call
    }

    fn component(&self) -> &'static str {
        AUDIO_SETTING_COMPONENT
    }

    fn command_args(&self) -> Value {
        json!({ "pos_args": [Self::QUERY] })
    }

    fn process_parsed_data(&self, data: Value) -> CommandResult<SymphonyStatus> {
        let args = match pos_args(&data) {
            Ok(args) => args,
            Err(e) => return CommandResult::failure(e),
        };
        if args.len() < 3 {
            return CommandResult::failure("pos_args does not contain 3 values");
        }
        match (as_int(&args[0]), as_int(&args[1]), as_int(&args[2])) {
            (Some(qs), Some(sound), Some(mode)) => CommandResult::success(SymphonyStatus {
                qs_state: qs_state_text(qs).to_string(),
                sound_mode: sound_mode_text(sound),
                mode_type: mode_type_text(mode).to_string(),
            }),
            _ => CommandResult::failure(format!(
                "Failed to process symphony status values: {}",
                Value::Array(args[..3].to_vec())
            )),
        }
    }
}

dsp_command!(
    /// `pp symphony group`: current group mode as text.
    SymphonyGroupCommand,
    CommandKind::SymphonyGroup,
    "pp symphony group"
);
dsp_wamp_plumbing!(SymphonyGroupCommand, String);

impl WampCommand for SymphonyGroupCommand {
    fn command_type(&self) -> WampCommandType {
        WampCommandType::Call
    }

    fn component(&self) -> &'static str {
        AUDIO_SETTING_COMPONENT
    }

    fn command_args(&self) -> Value {
        json!({ "pos_args": [Self::QUERY] })
    }

    fn process_parsed_data(&self, data: Value) -> CommandResult<String> {
        let args = match pos_args(&data) {
            Ok(args) => args,
            Err(e) => return CommandResult::failure(e),
        };
        match args.first() {
            None => CommandResult::failure("pos_args is empty in response"),
            Some(value) => {
                let text = as_int(value).map(group_mode_text).unwrap_or("Unknown");
                CommandResult::success(text.to_string())
            }
        }
    }
}

dsp_command!(
    /// `pp symphony volume add`: volume offset applied in Q-Symphony mode.
    SymphonyVolumeAddCommand,
    CommandKind::SymphonyVolumeAdd,
    "pp symphony volume add"
);
dsp_wamp_plumbing!(SymphonyVolumeAddCommand, i64);

impl WampCommand for SymphonyVolumeAddCommand {
    fn command_type(&self) -> WampCommandType {
        WampCommandType::Call
    }

    fn component(&self) -> &'static str {
        AUDIO_SETTING_COMPONENT
    }

    fn command_args(&self) -> Value {
        json!({ "pos_args": [Self::QUERY] })
    }

    fn process_parsed_data(&self, data: Value) -> CommandResult<i64> {
        let args = match pos_args(&data) {
            Ok(args) => args,
            Err(e) => return CommandResult::failure(e),
        };
        match args.first() {
            None => CommandResult::failure("pos_args is empty in response"),
            Some(value) => match as_int(value) {
                Some(v) => CommandResult::success(v),
                None => CommandResult::failure(format!(
                    "Failed to convert symphony volume add value to int: {}",
                    value
                )),
            },
        }
    }
}

dsp_command!(
    /// `pp surround speaker remap`: the first five remap slots.
    SurroundSpeakerRemapCommand,
    CommandKind::SurroundSpeakerRemap,
    "pp surround speaker remap"
);
dsp_wamp_plumbing!(SurroundSpeakerRemapCommand, Vec<i64>);

impl WampCommand for SurroundSpeakerRemapCommand {
    fn command_type(&self) -> WampCommandType {
        WampCommandType::Call
    }

    fn component(&self) -> &'static str {
        AUDIO_SETTING_COMPONENT
    }

    fn command_args(&self) -> Value {
        json!({ "pos_args": [Self::QUERY] })
    }

    fn process_parsed_data(&self, data: Value) -> CommandResult<Vec<i64>> {
        let args = match pos_args(&data) {
            Ok(args) => args,
            Err(e) => return CommandResult::failure(e),
        };
        if args.len() < 5 {
            return CommandResult::failure("pos_args does not contain 5 values");
        }
        let values: Option<Vec<i64>> = args[..5].iter().map(as_int).collect();
        match values {
            Some(values) => CommandResult::success(values),
            None => CommandResult::failure(format!(
                "Failed to convert surround speaker remap values to int: {}",
                Value::Array(args[..5].to_vec())
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockAdapter;

    fn response(json: &str) -> String {
        format!(
            "Calling remote procedure: `{}`\nReceived call result:\n{}",
            AUDIO_SETTING_COMPONENT, json
        )
    }

    #[test]
    fn test_lookup_tables() {
        assert_eq!(sound_mode_text(4), "Music");
        assert_eq!(sound_mode_text(9), "9");
        assert_eq!(group_mode_text(2), "Stereo");
        assert_eq!(group_mode_text(7), "Unknown");
        assert_eq!(qs_state_text(1), "On");
        assert_eq!(mode_type_text(0), "Symphony Lite");
    }

    #[tokio::test]
    async fn test_symphony_status() {
        let mock = Arc::new(MockAdapter::new());
        mock.push_output(response(r#"{"pos_args": [1, 3, 1]}"#));
        let cmd = SymphonyStatusCommand::new(mock.clone()).with_retry(RetryConfig::none());

        let result = cmd.execute().await;
        assert_eq!(
            result.into_data(),
            Some(SymphonyStatus {
                qs_state: "On".to_string(),
                sound_mode: "Standard".to_string(),
                mode_type: "Symphony".to_string(),
            })
        );
        assert!(mock.commands()[0].ends_with(r#"-a '{"pos_args":["pp symphony"]}'"#));
    }

    #[test]
    fn test_symphony_status_short_args() {
        let cmd = SymphonyStatusCommand::new(Arc::new(MockAdapter::new()));
        assert_eq!(
            cmd.process_parsed_data(json!({"pos_args": [1, 2]})).error(),
            Some("pos_args does not contain 3 values")
        );
        assert_eq!(
            cmd.process_parsed_data(json!({})).error(),
            Some("pos_args not found or not a list in response")
        );
    }

    #[test]
    fn test_group_and_volume() {
        let adapter = Arc::new(MockAdapter::new());
        let group = SymphonyGroupCommand::new(adapter.clone());
        assert_eq!(
            group.process_parsed_data(json!({"pos_args": [1]})).into_data(),
            Some("Group".to_string())
        );

        let volume = SymphonyVolumeAddCommand::new(adapter);
        assert_eq!(volume.process_parsed_data(json!({"pos_args": ["-3"]})).into_data(), Some(-3));
        assert!(volume.process_parsed_data(json!({"pos_args": ["loud"]})).is_failure());
    }

    #[tokio::test]
    async fn test_surround_remap() {
        let mock = Arc::new(MockAdapter::new());
        mock.push_output(response(r#"{"pos_args": [0, 1, 2, 3, 4, 5]}"#));
        let cmd = SurroundSpeakerRemapCommand::new(mock).with_retry(RetryConfig::none());
        assert_eq!(cmd.execute().await.into_data(), Some(vec![0, 1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn test_wrong_component_is_rejected() {
        let mock = Arc::new(MockAdapter::new());
        mock.push_output(
            "Calling remote procedure: `com.harman.dsp.SetAudioSetting`\nReceived call result:\n{\"pos_args\": [1]}",
        );
        let cmd = SymphonyGroupCommand::new(mock).with_retry(RetryConfig::none());
        let error = cmd.execute().await.error().map(str::to_string).unwrap_or_default();
        assert!(error.contains("WAMP component mismatch"), "{error}");
    }
}
