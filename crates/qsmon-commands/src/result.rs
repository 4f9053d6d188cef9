//! Command result envelope.
//!
//! A [`CommandResult`] is either `Success(data)` or `Failure(error)` and may
//! carry the [`CommandIdentity`] of the command that produced it. The issuer
//! is set once, by the command's processing layer, and consumers compare it
//! against the command they are waiting on before acting on the result.
//!
//! A failure also records whether another attempt could succeed. Only
//! failures built from a retryable [`CommandError`] are marked so.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::command::CommandError;

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique identity of one command instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CommandIdentity(u64);

impl CommandIdentity {
    /// Allocate a fresh identity.
    pub fn next() -> Self {
        Self(NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome<T> {
    Success(T),
    Failure { error: String, retryable: bool },
}

/// Success/failure envelope returned by every command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult<T> {
    outcome: Outcome<T>,
    issuer: Option<CommandIdentity>,
}

impl<T> CommandResult<T> {
    pub fn success(data: T) -> Self {
        Self {
            outcome: Outcome::Success(data),
            issuer: None,
        }
    }

    /// A terminal failure.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Failure {
                error: error.into(),
                retryable: false,
            },
            issuer: None,
        }
    }

    /// Build a terminal failure from any displayable error.
    pub fn from_error(error: impl fmt::Display) -> Self {
        Self::failure(error.to_string())
    }

    /// Build a failure from an engine error, keeping its retry class.
    pub fn from_command_error(error: CommandError) -> Self {
        Self {
            outcome: Outcome::Failure {
                retryable: error.is_retryable(),
                error: error.to_string(),
            },
            issuer: None,
        }
    }

    /// Tag the result with the command that produced it.
    ///
    /// The issuer can only be set once; later calls keep the original tag.
    pub fn with_issuer(mut self, issuer: CommandIdentity) -> Self {
        match self.issuer {
            None => self.issuer = Some(issuer),
            Some(existing) if existing != issuer => {
                tracing::warn!(
                    existing = %existing,
                    attempted = %issuer,
                    "Result issuer already set, keeping original"
                );
            }
            Some(_) => {}
        }
        self
    }

    pub fn issuer(&self) -> Option<CommandIdentity> {
        self.issuer
    }

    /// Whether this result was produced by `identity`.
    pub fn is_from(&self, identity: CommandIdentity) -> bool {
        self.issuer == Some(identity)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// Whether this is a failure another attempt might fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self.outcome, Outcome::Failure { retryable: true, .. })
    }

    pub fn data(&self) -> Option<&T> {
        match &self.outcome {
            Outcome::Success(data) => Some(data),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure { error, .. } => Some(error),
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self.outcome {
            Outcome::Success(data) => Some(data),
            Outcome::Failure { .. } => None,
        }
    }

    /// Convert into a plain `Result`, dropping the issuer.
    pub fn into_result(self) -> Result<T, String> {
        match self.outcome {
            Outcome::Success(data) => Ok(data),
            Outcome::Failure { error, .. } => Err(error),
        }
    }

    /// The data, or `default` on failure.
    pub fn data_or(self, default: T) -> T {
        self.into_data().unwrap_or(default)
    }

    /// Transform the success value. Failures pass through unchanged.
    pub fn map<U, F>(self, f: F) -> CommandResult<U>
    where
        F: FnOnce(T) -> U,
    {
        CommandResult {
            outcome: match self.outcome {
                Outcome::Success(data) => Outcome::Success(f(data)),
                Outcome::Failure { error, retryable } => Outcome::Failure { error, retryable },
            },
            issuer: self.issuer,
        }
    }

    /// Chain another fallible step on the success value.
    ///
    /// The issuer of `self` is kept unless the inner result already has one.
    pub fn and_then<U, F>(self, f: F) -> CommandResult<U>
    where
        F: FnOnce(T) -> CommandResult<U>,
    {
        let issuer = self.issuer;
        let mut next = match self.outcome {
            Outcome::Success(data) => f(data),
            Outcome::Failure { error, retryable } => CommandResult {
                outcome: Outcome::Failure { error, retryable },
                issuer: None,
            },
        };
        if next.issuer.is_none() {
            next.issuer = issuer;
        }
        next
    }
}

impl<T: fmt::Debug> fmt::Display for CommandResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Success(data) => write!(f, "CommandResult(success=true, data={:?})", data),
            Outcome::Failure { error, .. } => write!(f, "CommandResult(success=false, error={})", error),
        }
    }
}

impl<T: Serialize> Serialize for CommandResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("CommandResult", 4)?;
        state.serialize_field("success", &self.is_success())?;
        state.serialize_field("data", &self.data())?;
        state.serialize_field("error", &self.error())?;
        state.serialize_field("issuer_identity", &self.issuer.map(|i| i.as_u64()))?;
        state.end()
    }
}
