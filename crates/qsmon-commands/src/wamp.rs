//! Text-RPC ("call"/"publish") over shell output.
//!
//! The device ships a `test-wamp-client` tool that performs a remote
//! procedure call or publishes a notification and prints its progress as
//! free text. Responses are recognised by marker lines:
//!
//! ```text
//! Calling remote procedure: `com.example.GetInfo`
//! Received call result:
//! {"nam_args": {"a": 1}}
//! ```
//!
//! and for publishes `Sending notification: `<component>`` followed by a
//! line containing `Published event`. The component named in the output
//! must equal the one the command targeted; anything else is rejected so
//! that a response can never be attributed to the wrong command.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::command::{Command, CommandError};
use crate::result::CommandResult;

pub const WAMP_CLIENT: &str = "test-wamp-client";
pub const CALL_MARKER: &str = "Calling remote procedure:";
pub const RESULT_MARKER: &str = "Received call result:";
pub const NOTIFICATION_MARKER: &str = "Sending notification:";
pub const PUBLISHED_MARKER: &str = "Published event";

static CALL_COMPONENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Calling remote procedure:\s*`([^`]+)`").expect("valid regex"));
static NOTIFICATION_COMPONENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Sending notification:\s*`([^`]+)`").expect("valid regex"));

/// Call or publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WampCommandType {
    Call,
    Publish,
}

impl WampCommandType {
    pub fn flag(&self) -> &'static str {
        match self {
            WampCommandType::Call => "-c",
            WampCommandType::Publish => "-n",
        }
    }
}

/// Why a text-RPC response was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("No response from device")]
    EmptyResponse,

    #[error("No 'Calling remote procedure:' found in response")]
    MissingCallMarker,

    #[error("No 'Sending notification:' found in response")]
    MissingNotificationMarker,

    #[error("WAMP component mismatch. Expected: {expected}, Found: {found}")]
    ComponentMismatch { expected: String, found: String },

    #[error("No 'Received call result:' found in response")]
    MissingResultMarker,

    #[error("No 'Published event' found in response")]
    MissingPublishedMarker,

    #[error("JSON decode error: {0}")]
    InvalidJson(String),
}

impl From<ProtocolError> for CommandError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::InvalidJson(_) => CommandError::Parse(e.to_string()),
            other => CommandError::Protocol(other.to_string()),
        }
    }
}

/// Build the `test-wamp-client` invocation.
///
/// The JSON argument is wrapped in single quotes; embedded single quotes
/// are escaped for the shell.
pub fn build_shell_command(kind: WampCommandType, component: &str, args: &Value) -> String {
    let json = args.to_string().replace('\'', r"'\''");
    format!("{} {} {} -a '{}'", WAMP_CLIENT, kind.flag(), component, json)
}

/// Validate a call response and return the parsed result document.
pub fn parse_call_response(lines: &[String], expected: &str) -> Result<Value, ProtocolError> {
    if lines.is_empty() {
        return Err(ProtocolError::EmptyResponse);
    }

    let found = lines
        .iter()
        .filter(|line| line.contains(CALL_MARKER))
        .find_map(|line| CALL_COMPONENT.captures(line))
        .map(|caps| caps[1].to_string())
        .ok_or(ProtocolError::MissingCallMarker)?;

    if found != expected {
        return Err(ProtocolError::ComponentMismatch {
            expected: expected.to_string(),
            found,
        });
    }

    let start = lines
        .iter()
        .position(|line| line.contains(RESULT_MARKER))
        .ok_or(ProtocolError::MissingResultMarker)?;

    let document: String = lines[start + 1..].concat();
    tracing::trace!(component = expected, json = %document, "Call result document");
    serde_json::from_str(&document).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
}

/// Validate a publish response.
pub fn parse_publish_response(lines: &[String], expected: &str) -> Result<(), ProtocolError> {
    if lines.is_empty() {
        return Err(ProtocolError::EmptyResponse);
    }

    let mut found = None;
    let mut published = false;
    for line in lines {
        if line.contains(NOTIFICATION_MARKER) {
            if let Some(caps) = NOTIFICATION_COMPONENT.captures(line) {
                found = Some(caps[1].to_string());
            }
        }
        if line.contains(PUBLISHED_MARKER) {
            published = true;
        }
    }

    let found = found.ok_or(ProtocolError::MissingNotificationMarker)?;
    if found != expected {
        return Err(ProtocolError::ComponentMismatch {
            expected: expected.to_string(),
            found,
        });
    }
    if !published {
        return Err(ProtocolError::MissingPublishedMarker);
    }
    Ok(())
}

/// A command spoken over `test-wamp-client`.
///
/// Implementors describe the RPC; [`wamp_shell_command`] and
/// [`handle_wamp_response`] supply the [`Command`] plumbing.
pub trait WampCommand: Command {
    fn command_type(&self) -> WampCommandType;

    /// Fully qualified procedure or topic, e.g. `com.harman.dsp.GetAudioSetting`.
    fn component(&self) -> &'static str;

    /// JSON argument document.
    fn command_args(&self) -> Value;

    /// Turn the validated response document into the command's output.
    ///
    /// Publishes receive an empty object.
    fn process_parsed_data(&self, data: Value) -> CommandResult<Self::Output>;
}

pub fn wamp_shell_command<C: WampCommand + ?Sized>(command: &C) -> String {
    build_shell_command(command.command_type(), command.component(), &command.command_args())
}

/// Parse `lines` according to the command's type and hand the document to
/// `process_parsed_data`. Protocol failures never reach it.
pub fn handle_wamp_response<C: WampCommand + ?Sized>(
    command: &C,
    lines: &[String],
) -> CommandResult<C::Output> {
    let parsed = match command.command_type() {
        WampCommandType::Call => parse_call_response(lines, command.component()),
        WampCommandType::Publish => parse_publish_response(lines, command.component())
            .map(|()| Value::Object(serde_json::Map::new())),
    };

    match parsed {
        Ok(data) => command.process_parsed_data(data),
        Err(e) => {
            tracing::debug!(
                command = command.name(),
                component = command.component(),
                error = %e,
                "Rejected text-RPC response"
            );
            CommandResult::from_command_error(CommandError::from(e))
        }
    }
}

/// `pos_args` array of a call result.
pub(crate) fn pos_args(data: &Value) -> Result<&Vec<Value>, String> {
    data.get("pos_args")
        .and_then(Value::as_array)
        .ok_or_else(|| "pos_args not found or not a list in response".to_string())
}

/// Integer from a number or a numeric string.
pub(crate) fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_shell_command_format() {
        let cmd = build_shell_command(
            WampCommandType::Call,
            "com.harman.dsp.GetAudioSetting",
            &json!({"pos_args": ["pp symphony"]}),
        );
        assert_eq!(
            cmd,
            r#"test-wamp-client -c com.harman.dsp.GetAudioSetting -a '{"pos_args":["pp symphony"]}'"#
        );

        let cmd = build_shell_command(WampCommandType::Publish, "a.b", &json!({"pos_args": ["it's"]}));
        assert_eq!(cmd, r#"test-wamp-client -n a.b -a '{"pos_args":["it'\''s"]}'"#);
    }

    #[test]
    fn test_call_round_trip() {
        let output = lines(
            "Calling remote procedure: `com.example.GetInfo`\nReceived call result:\n{\"nam_args\": {\"a\": 1}}",
        );
        let data = parse_call_response(&output, "com.example.GetInfo").unwrap();
        assert_eq!(data, json!({"nam_args": {"a": 1}}));
    }

    #[test]
    fn test_call_json_is_concatenated_without_newlines() {
        let output = lines(
            "noise\nCalling remote procedure: `x.y`\nReceived call result:\n{\"pos_args\":\n[1,\n2]}",
        );
        assert_eq!(
            parse_call_response(&output, "x.y").unwrap(),
            json!({"pos_args": [1, 2]})
        );
    }

    #[test]
    fn test_call_errors() {
        assert_eq!(parse_call_response(&[], "x"), Err(ProtocolError::EmptyResponse));

        let missing = lines("Received call result:\n{}");
        assert_eq!(
            parse_call_response(&missing, "x"),
            Err(ProtocolError::MissingCallMarker)
        );

        let mismatch = lines("Calling remote procedure: `wrong.component`\nReceived call result:\n{}");
        assert!(matches!(
            parse_call_response(&mismatch, "expected.component"),
            Err(ProtocolError::ComponentMismatch { .. })
        ));

        let no_result = lines("Calling remote procedure: `x`\n{}");
        assert_eq!(
            parse_call_response(&no_result, "x"),
            Err(ProtocolError::MissingResultMarker)
        );

        let bad_json = lines("Calling remote procedure: `x`\nReceived call result:\n{nope");
        assert!(matches!(
            parse_call_response(&bad_json, "x"),
            Err(ProtocolError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_publish() {
        let ok = lines("Sending notification: `com.example.Update`\nPublished event");
        assert_eq!(parse_publish_response(&ok, "com.example.Update"), Ok(()));

        let unpublished = lines("Sending notification: `com.example.Update`");
        assert_eq!(
            parse_publish_response(&unpublished, "com.example.Update"),
            Err(ProtocolError::MissingPublishedMarker)
        );

        let other = lines("Sending notification: `com.example.Other`\nPublished event");
        assert!(matches!(
            parse_publish_response(&other, "com.example.Update"),
            Err(ProtocolError::ComponentMismatch { .. })
        ));
    }

    #[test]
    fn test_protocol_errors_map_to_command_errors() {
        assert!(matches!(
            CommandError::from(ProtocolError::InvalidJson("eof".into())),
            CommandError::Parse(_)
        ));
        assert!(matches!(
            CommandError::from(ProtocolError::MissingCallMarker),
            CommandError::Protocol(_)
        ));
    }

    #[test]
    fn test_as_int() {
        assert_eq!(as_int(&json!(3)), Some(3));
        assert_eq!(as_int(&json!("-2")), Some(-2));
        assert_eq!(as_int(&json!("x")), None);
    }
}
