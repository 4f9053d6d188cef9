//! Device identity commands.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::command::{Command, CommandBase, CommandError, CommandKind};
use crate::executor::DeviceAdapter;
use crate::impl_command_meta;
use crate::result::CommandResult;
use crate::retry::RetryConfig;
use crate::wamp::{handle_wamp_response, pos_args, wamp_shell_command, WampCommand, WampCommandType};

pub const GET_DEVICE_INFO_COMPONENT: &str = "com.harman.system.getDevInfoDynamic";
pub const SAVE_DEVICE_NAME_COMPONENT: &str = "com.harman.ucd.SaveDevName";
pub const UPDATE_DEVICE_NAME_COMPONENT: &str = "com.harman.ucd.UpdateDeviceName";

fn check_device_name(name: &str) -> Result<String, CommandError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CommandError::InvalidParameter(
            "Device name is required".to_string(),
        ));
    }
    Ok(name.to_string())
}

/// Reads the dynamic device information map.
pub struct GetDeviceInfoCommand {
    base: CommandBase,
}

impl GetDeviceInfoCommand {
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

impl_command_meta!(GetDeviceInfoCommand, CommandKind::GetDeviceInfo);

impl Command for GetDeviceInfoCommand {
    type Output = Map<String, Value>;

    fn base(&self) -> &CommandBase {
        &self.base
    }

    fn shell_command(&self) -> String {
        wamp_shell_command(self)
    }

    fn handle_response(&self, lines: &[String]) -> CommandResult<Self::Output> {
        handle_wamp_response(self, lines)
    }
}

impl WampCommand for GetDeviceInfoCommand {
    fn command_type(&self) -> WampCommandType {
        WampCommandType::Call
    }

    fn component(&self) -> &'static str {
        GET_DEVICE_INFO_COMPONENT
    }

    fn command_args(&self) -> Value {
        json!({ "pos_args": [] })
    }

    fn process_parsed_data(&self, data: Value) -> CommandResult<Self::Output> {
        match data {
            Value::Object(mut obj) => match obj.remove("nam_args") {
                Some(Value::Object(info)) => CommandResult::success(info),
                _ => CommandResult::failure("nam_args not found or not a dict in response"),
            },
            _ => CommandResult::failure("nam_args not found or not a dict in response"),
        }
    }
}

/// Persists a new device name. Succeeds when the device answers "Success".
pub struct SaveDeviceNameCommand {
    base: CommandBase,
    device_name: String,
}

impl SaveDeviceNameCommand {
    pub fn new(adapter: Arc<dyn DeviceAdapter>, device_name: &str) -> Result<Self, CommandError> {
        Ok(Self {
            base: CommandBase::new(adapter),
            device_name: check_device_name(device_name)?,
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.base = self.base.with_retry(retry);
        self
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl_command_meta!(SaveDeviceNameCommand, CommandKind::SaveDeviceName);

impl Command for SaveDeviceNameCommand {
    type Output = bool;

    fn base(&self) -> &CommandBase {
        &self.base
    }

    fn shell_command(&self) -> String {
        wamp_shell_command(self)
    }

    fn handle_response(&self, lines: &[String]) -> CommandResult<bool> {
        handle_wamp_response(self, lines)
    }
}

impl WampCommand for SaveDeviceNameCommand {
    fn command_type(&self) -> WampCommandType {
        WampCommandType::Call
    }

    fn component(&self) -> &'static str {
        SAVE_DEVICE_NAME_COMPONENT
    }

    fn command_args(&self) -> Value {
        json!({ "pos_args": [self.device_name] })
    }

    fn process_parsed_data(&self, data: Value) -> CommandResult<bool> {
        let args = match pos_args(&data) {
            Ok(args) => args,
            Err(e) => return CommandResult::failure(e),
        };
        match args.first() {
            None => CommandResult::failure("pos_args is empty in response"),
            Some(Value::String(s)) if s == "Success" => {
                tracing::info!(name = %self.device_name, "Device name saved");
                CommandResult::success(true)
            }
            Some(other) => {
                CommandResult::failure(format!("Failed to save device name. Response: {}", other))
            }
        }
    }
}

/// Broadcasts a device-name change notification.
pub struct UpdateDeviceNameCommand {
    base: CommandBase,
    device_name: String,
}

impl UpdateDeviceNameCommand {
    pub fn new(adapter: Arc<dyn DeviceAdapter>, device_name: &str) -> Result<Self, CommandError> {
        Ok(Self {
            base: CommandBase::new(adapter),
            device_name: check_device_name(device_name)?,
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.base = self.base.with_retry(retry);
        self
    }
}

impl_command_meta!(UpdateDeviceNameCommand, CommandKind::UpdateDeviceName);

impl Command for UpdateDeviceNameCommand {
    type Output = bool;

    fn base(&self) -> &CommandBase {
        &self.base
    }

    fn shell_command(&self) -> String {
        wamp_shell_command(self)
    }

    fn handle_response(&self, lines: &[String]) -> CommandResult<bool> {
        handle_wamp_response(self, lines)
    }
}

impl WampCommand for UpdateDeviceNameCommand {
    fn command_type(&self) -> WampCommandType {
        WampCommandType::Publish
    }

    fn component(&self) -> &'static str {
        UPDATE_DEVICE_NAME_COMPONENT
    }

    fn command_args(&self) -> Value {
        json!({ "pos_args": [self.device_name] })
    }

    fn process_parsed_data(&self, _data: Value) -> CommandResult<bool> {
        tracing::info!(name = %self.device_name, "Device name update published");
        CommandResult::success(true)
    }
}
