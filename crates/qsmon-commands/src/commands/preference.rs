//! ACM preference file reader.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::{Command, CommandBase, CommandKind, CommandMeta};
use crate::executor::DeviceAdapter;
use crate::impl_command_meta;
use crate::result::CommandResult;
use crate::retry::RetryConfig;

pub const PREFERENCE_FILE: &str = "/data/acm/.preference_data";

pub const ACM_STATE_KEY: &str = "com.harman.acm_service.state";
pub const MULTIROOM_INFO_KEY: &str = "db/waapp/multiroom_info";
pub const MULTIROOM_MODE_KEY: &str = "db/waapp/multiroom_mode";

const NOT_AVAILABLE: &str = "N/A";

// Bare object keys written by the device firmware, e.g. `{db/waapp/x: 1}`.
static UNQUOTED_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([{,]\s*)([a-zA-Z_][a-zA-Z0-9_./-]*)(\s*:)").expect("valid regex")
});

/// Fields extracted from the preference file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceData {
    pub acm_service_state: String,
    pub multiroom_grouptype: String,
    pub multiroom_mode: String,
}

impl Default for PreferenceData {
    fn default() -> Self {
        Self {
            acm_service_state: NOT_AVAILABLE.to_string(),
            multiroom_grouptype: NOT_AVAILABLE.to_string(),
            multiroom_mode: NOT_AVAILABLE.to_string(),
        }
    }
}

/// Parse the preference document, quoting bare keys if the strict parse fails.
pub fn parse_preference_json(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }
    let repaired = UNQUOTED_KEY.replace_all(text, "$1\"$2\"$3");
    serde_json::from_str(&repaired).ok()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => NOT_AVAILABLE.to_string(),
        other => other.to_string(),
    }
}

/// `grouptype=<x>` token from the space separated multiroom info string.
fn grouptype(info: &str) -> Option<String> {
    info.split_whitespace()
        .find_map(|token| token.strip_prefix("grouptype="))
        .map(str::to_string)
}

impl PreferenceData {
    pub fn from_document(doc: &Value) -> Self {
        let mut data = PreferenceData::default();
        if let Some(state) = doc.get(ACM_STATE_KEY) {
            data.acm_service_state = value_text(state);
        }
        if let Some(group) = doc
            .get(MULTIROOM_INFO_KEY)
            .and_then(Value::as_str)
            .and_then(grouptype)
        {
            data.multiroom_grouptype = group;
        }
        if let Some(mode) = doc.get(MULTIROOM_MODE_KEY) {
            data.multiroom_mode = value_text(mode);
        }
        data
    }
}

/// `cat` the preference file and extract ACM and multiroom state.
pub struct PreferenceDataCommand {
    base: CommandBase,
}

impl PreferenceDataCommand {
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

impl_command_meta!(PreferenceDataCommand, CommandKind::PreferenceData);

impl Command for PreferenceDataCommand {
    type Output = PreferenceData;

    fn base(&self) -> &CommandBase {
        &self.base
    }

    fn shell_command(&self) -> String {
        format!("cat {}", PREFERENCE_FILE)
    }

    fn handle_response(&self, lines: &[String]) -> CommandResult<PreferenceData> {
        if lines.is_empty() {
            return CommandResult::failure("No response data received");
        }
        // Lines are concatenated as-is; values may wrap across them.
        let text = lines.concat();
        match parse_preference_json(text.trim()) {
            Some(doc) => CommandResult::success(PreferenceData::from_document(&doc)),
            None => {
                tracing::warn!(command = self.name(), "Preference data is not valid JSON");
                CommandResult::failure("Failed to parse preference data JSON")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockAdapter;
    use serde_json::json;

    fn command() -> PreferenceDataCommand {
        PreferenceDataCommand::new(Arc::new(MockAdapter::new()))
    }

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_strict_json() {
        let result = command().handle_response(&lines(
            r#"{"com.harman.acm_service.state": "ready",
                "db/waapp/multiroom_info": "id=4 grouptype=stereo leader=1",
                "db/waapp/multiroom_mode": "group"}"#,
        ));
        assert_eq!(
            result.into_data(),
            Some(PreferenceData {
                acm_service_state: "ready".into(),
                multiroom_grouptype: "stereo".into(),
                multiroom_mode: "group".into(),
            })
        );
    }

    #[test]
    fn test_value_wrapped_across_lines() {
        let wrapped = vec![
            r#"{"com.harman.acm_service.state": "PL"#.to_string(),
            r#"AY", "db/waapp/multiroom_mode": "1"}"#.to_string(),
        ];
        let data = command().handle_response(&wrapped).into_data().unwrap();
        assert_eq!(data.acm_service_state, "PLAY");
        assert_eq!(data.multiroom_mode, "1");
    }

    #[test]
    fn test_unquoted_keys_are_repaired() {
        let doc = parse_preference_json(r#"{com.harman.acm_service.state: "idle", db/waapp/multiroom_mode: 2}"#)
            .unwrap();
        assert_eq!(doc["com.harman.acm_service.state"], json!("idle"));

        let data = PreferenceData::from_document(&doc);
        assert_eq!(data.acm_service_state, "idle");
        assert_eq!(data.multiroom_mode, "2");
        assert_eq!(data.multiroom_grouptype, "N/A");
    }

    #[test]
    fn test_failures() {
        assert_eq!(
            command().handle_response(&[]).error(),
            Some("No response data received")
        );
        assert_eq!(
            command().handle_response(&lines("cat: No such file or directory")).error(),
            Some("Failed to parse preference data JSON")
        );
    }

    #[tokio::test]
    async fn test_execute_reads_preference_file() {
        let mock = Arc::new(MockAdapter::new());
        mock.push_output("{}");
        let cmd = PreferenceDataCommand::new(mock.clone()).with_retry(RetryConfig::none());

        assert_eq!(cmd.execute().await.into_data(), Some(PreferenceData::default()));
        assert_eq!(mock.commands(), vec!["cat /data/acm/.preference_data".to_string()]);
    }
}
