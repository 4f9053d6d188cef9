//! Routing of finished command results to their processors.
//!
//! Every [`CommandKind`] is bound to at most one [`ResultProcessor`]. A
//! result whose command kind was never registered is dropped: processors
//! only ever see the kinds they asked for, even when several kinds share an
//! output shape.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::command::{panic_message, CommandKind, CommandMeta};
use crate::output::CommandOutput;
use crate::result::CommandResult;

/// Result processor errors.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("{processor} does not handle {kind}")]
    UnexpectedKind {
        processor: String,
        kind: CommandKind,
    },

    #[error("Unexpected output for {kind}")]
    UnexpectedOutput { kind: CommandKind },

    #[error("Processing failed: {0}")]
    Failed(String),
}

/// Consumes results for a fixed set of command kinds.
pub trait ResultProcessor: Send + Sync {
    fn name(&self) -> &str;

    /// Kinds this processor is registered for by
    /// [`CommandHandler::register_processor`].
    fn handled_kinds(&self) -> &[CommandKind];

    fn process_command_result(
        &self,
        command: &dyn CommandMeta,
        result: &CommandResult<CommandOutput>,
    ) -> Result<(), ProcessorError>;
}

type ProcessorFn =
    dyn Fn(&dyn CommandMeta, &CommandResult<CommandOutput>) -> Result<(), ProcessorError> + Send + Sync;

/// [`ResultProcessor`] backed by a closure.
pub struct FnProcessor {
    name: String,
    kinds: Vec<CommandKind>,
    f: Box<ProcessorFn>,
}

impl FnProcessor {
    pub fn new<F>(name: impl Into<String>, kinds: Vec<CommandKind>, f: F) -> Self
    where
        F: Fn(&dyn CommandMeta, &CommandResult<CommandOutput>) -> Result<(), ProcessorError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            kinds,
            f: Box::new(f),
        }
    }
}

impl ResultProcessor for FnProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn handled_kinds(&self) -> &[CommandKind] {
        &self.kinds
    }

    fn process_command_result(
        &self,
        command: &dyn CommandMeta,
        result: &CommandResult<CommandOutput>,
    ) -> Result<(), ProcessorError> {
        (self.f)(command, result)
    }
}

/// Routing table from command kind to processor.
#[derive(Default)]
pub struct CommandHandler {
    routes: RwLock<HashMap<CommandKind, Arc<dyn ResultProcessor>>>,
    default: RwLock<Option<Arc<dyn ResultProcessor>>>,
}

impl CommandHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `kind` to `processor`. The first registration wins; later ones
    /// are ignored and return `false`.
    pub fn register_class_handler(&self, kind: CommandKind, processor: Arc<dyn ResultProcessor>) -> bool {
        let mut routes = self.routes.write();
        if let Some(existing) = routes.get(&kind) {
            tracing::debug!(
                kind = %kind,
                existing = existing.name(),
                ignored = processor.name(),
                "Handler already registered"
            );
            return false;
        }
        tracing::debug!(kind = %kind, processor = processor.name(), "Registered handler");
        routes.insert(kind, processor);
        true
    }

    /// Register `processor` for each of its handled kinds. Returns how many
    /// kinds were newly bound.
    pub fn register_processor(&self, processor: Arc<dyn ResultProcessor>) -> usize {
        processor
            .handled_kinds()
            .to_vec()
            .into_iter()
            .filter(|kind| self.register_class_handler(*kind, processor.clone()))
            .count()
    }

    /// Set the fallback used by [`handle_with_default`](Self::handle_with_default).
    pub fn register_default_handler(&self, processor: Arc<dyn ResultProcessor>) {
        *self.default.write() = Some(processor);
    }

    pub fn unregister_class_handler(&self, kind: CommandKind) -> bool {
        self.routes.write().remove(&kind).is_some()
    }

    pub fn is_registered(&self, kind: CommandKind) -> bool {
        self.routes.read().contains_key(&kind)
    }

    /// Registered kinds, sorted.
    pub fn registered_kinds(&self) -> Vec<CommandKind> {
        let mut kinds: Vec<_> = self.routes.read().keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn clear(&self) {
        self.routes.write().clear();
        *self.default.write() = None;
    }

    /// Route `result` to the processor registered for the command's kind.
    ///
    /// Returns `false` when no processor is registered or the processor
    /// failed. Never panics.
    pub fn handle_command(&self, command: &dyn CommandMeta, result: &CommandResult<CommandOutput>) -> bool {
        let processor = self.routes.read().get(&command.kind()).cloned();
        match processor {
            Some(processor) => Self::dispatch(processor.as_ref(), command, result),
            None => {
                tracing::debug!(
                    command = command.name(),
                    identity = %command.identity(),
                    "No handler registered, dropping result"
                );
                false
            }
        }
    }

    /// Like [`handle_command`](Self::handle_command), but unregistered kinds
    /// go to the default handler when one is set.
    pub fn handle_with_default(&self, command: &dyn CommandMeta, result: &CommandResult<CommandOutput>) -> bool {
        if self.is_registered(command.kind()) {
            return self.handle_command(command, result);
        }
        let fallback = self.default.read().clone();
        match fallback {
            Some(processor) => Self::dispatch(processor.as_ref(), command, result),
            None => {
                tracing::debug!(command = command.name(), "No handler or default handler, dropping result");
                false
            }
        }
    }

    fn dispatch(
        processor: &dyn ResultProcessor,
        command: &dyn CommandMeta,
        result: &CommandResult<CommandOutput>,
    ) -> bool {
        match catch_unwind(AssertUnwindSafe(|| processor.process_command_result(command, result))) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(
                    processor = processor.name(),
                    command = command.name(),
                    error = %e,
                    "Result processor failed"
                );
                false
            }
            Err(payload) => {
                tracing::error!(
                    processor = processor.name(),
                    command = command.name(),
                    error = %panic_message(payload.as_ref()),
                    "Result processor panicked"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("registered", &self.registered_kinds())
            .field("has_default", &self.default.read().is_some())
            .finish()
    }
}
