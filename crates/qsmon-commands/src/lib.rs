//! QSMon command engine.
//!
//! Issues shell-level commands to a device through a [`DeviceAdapter`],
//! parses their text output into typed [`CommandResult`]s, retries transient
//! failures, enforces per-attempt deadlines and routes finished results to
//! processors that publish events on the core event bus.
//!
//! ## Architecture
//!
//! ```text
//! Command ──► CommandTask ──► WorkerPool
//!    │             │  RetryPolicy + TimeoutManager
//!    ▼             ▼
//! CommandExecutor  CommandHandler ──► ResultProcessor ──► EventManager
//!    │
//!    ▼
//! DeviceAdapter (adb, mock, ...)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use qsmon_commands::commands::SymphonyStatusCommand;
//! use qsmon_commands::testing::MockAdapter;
//! use qsmon_commands::CommandTask;
//!
//! # async fn demo() {
//! let adapter = Arc::new(MockAdapter::new());
//! let task = CommandTask::new(SymphonyStatusCommand::new(adapter))
//!     .on_complete(|_, result| println!("{}", result));
//! let report = task.run().await;
//! # }
//! ```

pub mod command;
pub mod commands;
pub mod executor;
pub mod factory;
pub mod handler;
pub mod output;
pub mod pool;
pub mod processors;
pub mod registry;
pub mod result;
pub mod retry;
pub mod task;
pub mod testing;
pub mod timeout;
pub mod wamp;

pub use command::{
    validate_shell_command, Command, CommandBase, CommandError, CommandKind, CommandMeta,
    ExecutionContext, ResultCallback,
};
pub use executor::{split_lines, AdapterError, CommandExecutor, DeviceAdapter};
pub use factory::{parse_bool, AnyCommand, CommandFactory, DynCommand};
pub use handler::{CommandHandler, FnProcessor, ProcessorError, ResultProcessor};
pub use output::CommandOutput;
pub use pool::{WorkerPool, WorkerPoolConfig};
pub use registry::{builtin_processor, FeatureRegistry, FeatureSummary, ProcessorRegistry};
pub use result::{CommandIdentity, CommandResult};
pub use retry::{RetryCallback, RetryConfig, RetryPolicy, RetryStrategy};
pub use task::{CommandTask, TaskCallback, TaskConfig, TaskEvent, TaskHandle, TaskReport, TaskState};
pub use timeout::{TimeoutCallback, TimeoutManager};
pub use wamp::{ProtocolError, WampCommand, WampCommandType};
