//! Type-erased commands and construction by name.
//!
//! [`DynCommand`] is the object-safe face of [`Command`], producing
//! [`CommandOutput`]; every command whose output converts into
//! [`CommandOutput`] gets it for free. [`AnyCommand`] boxes one and is itself
//! a [`Command`], so it can run inside a [`CommandTask`](crate::task::CommandTask).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::command::{
    Command, CommandBase, CommandError, CommandKind, CommandMeta, ExecutionContext, ResultCallback,
};
use crate::commands::{
    CoredumpMonitorCommand, GetDeviceInfoCommand, NetworkInterfaceCommand, PreferenceDataCommand,
    RebootCommand, SaveDeviceNameCommand, ShellCommand, SurroundSpeakerRemapCommand,
    SymphonyGroupCommand, SymphonyStatusCommand, SymphonyVolumeAddCommand, UpdateDeviceNameCommand,
    DEFAULT_INTERFACE,
};
use crate::executor::DeviceAdapter;
use crate::output::CommandOutput;
use crate::result::{CommandIdentity, CommandResult};
use crate::retry::RetryConfig;

/// Object-safe command producing [`CommandOutput`].
#[async_trait]
pub trait DynCommand: CommandMeta {
    fn command_base(&self) -> &CommandBase;

    fn command_line(&self) -> String;

    fn check(&self) -> Result<(), CommandError>;

    fn context(&self) -> ExecutionContext;

    fn parse_lines(&self, lines: &[String]) -> CommandResult<CommandOutput>;

    fn parse_output(&self, output: Option<String>) -> CommandResult<CommandOutput>;

    async fn run(&self) -> CommandResult<CommandOutput>;

    async fn run_async(&self, callback: ResultCallback<CommandOutput>);
}

#[async_trait]
impl<C> DynCommand for C
where
    C: Command,
    C::Output: Into<CommandOutput>,
{
    fn command_base(&self) -> &CommandBase {
        Command::base(self)
    }

    fn command_line(&self) -> String {
        Command::shell_command(self)
    }

    fn check(&self) -> Result<(), CommandError> {
        Command::validate(self)
    }

    fn context(&self) -> ExecutionContext {
        Command::execution_context(self)
    }

    fn parse_lines(&self, lines: &[String]) -> CommandResult<CommandOutput> {
        Command::handle_response(self, lines).map(Into::into)
    }

    fn parse_output(&self, output: Option<String>) -> CommandResult<CommandOutput> {
        Command::process_output(self, output).map(Into::into)
    }

    async fn run(&self) -> CommandResult<CommandOutput> {
        Command::execute(self).await.map(Into::into)
    }

    async fn run_async(&self, callback: ResultCallback<CommandOutput>) {
        Command::execute_async(
            self,
            Box::new(move |result: CommandResult<C::Output>| callback(result.map(Into::into))),
        )
        .await;
    }
}

/// A boxed [`DynCommand`] usable wherever a [`Command`] is expected.
pub struct AnyCommand(Box<dyn DynCommand>);

impl AnyCommand {
    pub fn new<C: DynCommand + 'static>(command: C) -> Self {
        Self(Box::new(command))
    }

    pub fn inner(&self) -> &dyn DynCommand {
        self.0.as_ref()
    }
}

impl std::fmt::Debug for AnyCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyCommand")
            .field("kind", &self.0.kind())
            .field("identity", &self.0.identity())
            .finish()
    }
}

impl CommandMeta for AnyCommand {
    fn kind(&self) -> CommandKind {
        self.0.kind()
    }

    fn identity(&self) -> CommandIdentity {
        self.0.identity()
    }
}

#[async_trait]
impl Command for AnyCommand {
    type Output = CommandOutput;

    fn base(&self) -> &CommandBase {
        self.0.command_base()
    }

    fn shell_command(&self) -> String {
        self.0.command_line()
    }

    fn handle_response(&self, lines: &[String]) -> CommandResult<CommandOutput> {
        self.0.parse_lines(lines)
    }

    fn validate(&self) -> Result<(), CommandError> {
        self.0.check()
    }

    fn execution_context(&self) -> ExecutionContext {
        self.0.context()
    }

    fn process_output(&self, output: Option<String>) -> CommandResult<CommandOutput> {
        self.0.parse_output(output)
    }

    async fn execute(&self) -> CommandResult<CommandOutput> {
        self.0.run().await
    }

    async fn execute_async(&self, callback: ResultCallback<CommandOutput>) {
        self.0.run_async(callback).await
    }
}

/// Builds commands from their snake_case kind names.
///
/// Recognised parameters: `name` for the device-name commands,
/// `interface` for `network_interface`, `sync` for `reboot` and
/// `command` for `shell`.
#[derive(Clone)]
pub struct CommandFactory {
    adapter: Arc<dyn DeviceAdapter>,
    retry: RetryConfig,
}

impl CommandFactory {
    pub fn new(adapter: Arc<dyn DeviceAdapter>) -> Self {
        Self {
            adapter,
            retry: RetryConfig::none(),
        }
    }

    /// Retry settings for the commands' synchronous path.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// One-shot construction with default settings.
    pub fn create(
        kind_name: &str,
        adapter: Arc<dyn DeviceAdapter>,
        params: &HashMap<String, String>,
    ) -> Result<AnyCommand, CommandError> {
        Self::new(adapter).build(kind_name.parse()?, params)
    }

    pub fn build_by_name(&self, kind_name: &str, params: &HashMap<String, String>) -> Result<AnyCommand, CommandError> {
        self.build(kind_name.parse()?, params)
    }

    pub fn build(&self, kind: CommandKind, params: &HashMap<String, String>) -> Result<AnyCommand, CommandError> {
        let adapter = self.adapter.clone();
        let retry = self.retry.clone();
        let command = match kind {
            CommandKind::GetDeviceInfo => AnyCommand::new(GetDeviceInfoCommand::new(adapter).with_retry(retry)),
            CommandKind::SaveDeviceName => AnyCommand::new(
                SaveDeviceNameCommand::new(adapter, required(params, "name")?)?.with_retry(retry),
            ),
            CommandKind::UpdateDeviceName => AnyCommand::new(
                UpdateDeviceNameCommand::new(adapter, required(params, "name")?)?.with_retry(retry),
            ),
            CommandKind::SymphonyStatus => AnyCommand::new(SymphonyStatusCommand::new(adapter).with_retry(retry)),
            CommandKind::SymphonyGroup => AnyCommand::new(SymphonyGroupCommand::new(adapter).with_retry(retry)),
            CommandKind::SymphonyVolumeAdd => {
                AnyCommand::new(SymphonyVolumeAddCommand::new(adapter).with_retry(retry))
            }
            CommandKind::SurroundSpeakerRemap => {
                AnyCommand::new(SurroundSpeakerRemapCommand::new(adapter).with_retry(retry))
            }
            CommandKind::PreferenceData => AnyCommand::new(PreferenceDataCommand::new(adapter).with_retry(retry)),
            CommandKind::NetworkInterface => {
                let interface = params.get("interface").map(String::as_str).unwrap_or(DEFAULT_INTERFACE);
                AnyCommand::new(NetworkInterfaceCommand::new(adapter, interface)?.with_retry(retry))
            }
            CommandKind::CoredumpMonitor => AnyCommand::new(CoredumpMonitorCommand::new(adapter).with_retry(retry)),
            CommandKind::Reboot => {
                let sync = match params.get("sync") {
                    Some(value) => parse_bool(value)
                        .ok_or_else(|| CommandError::InvalidParameter(format!("sync: {}", value)))?,
                    None => true,
                };
                AnyCommand::new(RebootCommand::new(adapter).with_sync(sync))
            }
            CommandKind::Shell => {
                AnyCommand::new(ShellCommand::new(adapter, required(params, "command")?)?.with_retry(retry))
            }
        };
        tracing::debug!(kind = %kind, identity = %command.identity(), "Created command");
        Ok(command)
    }
}

fn required<'a>(params: &'a HashMap<String, String>, key: &str) -> Result<&'a str, CommandError> {
    params
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| CommandError::InvalidParameter(format!("missing parameter '{}'", key)))
}

/// Parse a boolean command parameter (`true`/`false`, `1`/`0`, `yes`/`no`, `on`/`off`).
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockAdapter;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_every_kind_can_be_built() {
        let factory = CommandFactory::new(Arc::new(MockAdapter::new()));
        let all = params(&[("name", "Den"), ("command", "uptime")]);
        for kind in CommandKind::ALL {
            let cmd = factory.build(kind, &all).unwrap();
            assert_eq!(cmd.kind(), kind);
            assert!(!cmd.shell_command().is_empty());
        }
    }

    #[test]
    fn test_unknown_kind_and_missing_params() {
        let adapter: Arc<dyn DeviceAdapter> = Arc::new(MockAdapter::new());
        assert!(matches!(
            CommandFactory::create("warp_drive", adapter.clone(), &HashMap::new()),
            Err(CommandError::UnknownKind(_))
        ));
        assert!(matches!(
            CommandFactory::create("save_device_name", adapter.clone(), &HashMap::new()),
            Err(CommandError::InvalidParameter(_))
        ));
        assert!(matches!(
            CommandFactory::create("reboot", adapter, &params(&[("sync", "maybe")])),
            Err(CommandError::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_erased_command_keeps_overrides() {
        let mock = Arc::new(MockAdapter::new());
        mock.push_no_output();
        let cmd = CommandFactory::create("coredump_monitor", mock, &HashMap::new()).unwrap();

        let result = cmd.execute().await;
        assert_eq!(result.into_data(), Some(CommandOutput::CoreDumps(Default::default())));
    }

    #[tokio::test]
    async fn test_erased_command_output() {
        let mock = Arc::new(MockAdapter::new());
        mock.push_output("ifconfig: wlan9: error fetching interface information: Device not found");
        let cmd = CommandFactory::create("network_interface", mock.clone(), &params(&[("interface", "wlan9")]))
            .unwrap();

        let result = cmd.execute().await;
        let Some(CommandOutput::NetworkInterface(info)) = result.data() else {
            panic!("unexpected result: {result}");
        };
        assert_eq!(info.interface, "wlan9");
        assert_eq!(info.status, "N/A");
        assert!(result.is_from(cmd.identity()));
        assert_eq!(mock.commands(), vec!["ifconfig wlan9".to_string()]);
    }
}
