//! Core building blocks shared by the QSMon crates.
//!
//! Provides:
//! - Typed device events and the topic-keyed [`EventManager`]
//! - Runtime argument schemas for dynamic topics
//! - Configuration loading (`qsmon.toml` + environment overrides)
//! - Logging initialisation

pub mod config;
pub mod event;
pub mod eventbus;
pub mod schema;
pub mod telemetry;

pub use config::{
    AppConfig, ConfigError, DeviceConfig, EngineConfig, LoggingConfig, MonitorConfig,
    RetryStrategy,
};
pub use event::{topics, Event};
pub use eventbus::{event_handler, EventError, EventHandler, EventManager, ReadyListener};
pub use schema::{ArgType, EventSchema, SchemaViolation, TopicSchema};
