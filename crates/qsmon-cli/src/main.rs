//! Command-line interface for the QSMon device monitor.

mod adb;
mod session;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::sync::oneshot;

use qsmon_commands::processors::RebootProcessor;
use qsmon_commands::{
    parse_bool, AnyCommand, CommandFactory, CommandHandler, CommandKind, CommandTask, FeatureRegistry,
    ProcessorRegistry, TaskConfig, WorkerPool, WorkerPoolConfig,
};
use qsmon_core::{event_handler, telemetry, topics, AppConfig, Event, EventManager};

use crate::adb::AdbShellAdapter;
use crate::session::MonitorSession;

/// QSMon - monitor and control a Q-Symphony soundbar over adb.
#[derive(Parser, Debug)]
#[command(name = "qsmon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Commands,

    /// Configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Device serial passed to adb.
    #[arg(short, long, global = true)]
    serial: Option<String>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a single device command and print its result as JSON.
    Run {
        /// Command kind, e.g. `symphony_status`.
        kind: String,
        /// Command parameter, repeatable.
        #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Per-attempt timeout in seconds.
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Poll the enabled features' commands and log bus events until Ctrl-C.
    Monitor {
        /// Seconds between polling cycles.
        #[arg(short, long)]
        interval: Option<u64>,
        /// Feature to enable, repeatable. Defaults to the configured ones.
        #[arg(short, long = "feature")]
        features: Vec<String>,
    },
    /// List supported command kinds.
    Kinds,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(serial) = args.serial {
        config.device.serial = Some(serial);
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }
    telemetry::init_logging(&config.logging);

    match args.command {
        Commands::Kinds => {
            list_kinds();
            Ok(())
        }
        Commands::Run { kind, params, timeout } => run_command(&config, &kind, params, timeout).await,
        Commands::Monitor { interval, features } => run_monitor(&config, interval, features).await,
    }
}

fn list_kinds() {
    for kind in CommandKind::ALL {
        println!("{:<24} {}", kind.as_str(), kind.type_name());
    }
}

/// Connect to the configured device, failing early when it is unreachable.
async fn connect(config: &AppConfig) -> Result<Arc<AdbShellAdapter>> {
    let adapter = Arc::new(AdbShellAdapter::from_config(&config.device));
    if !adapter.refresh().await {
        anyhow::bail!(
            "Device {} is not connected (adb: {})",
            adapter.serial().unwrap_or("<default>"),
            config.device.adb_path
        );
    }
    Ok(adapter)
}

/// Run one command through a task on the worker pool.
async fn run_command(
    config: &AppConfig,
    kind: &str,
    params: Vec<(String, String)>,
    timeout: Option<u64>,
) -> Result<()> {
    let kind: CommandKind = kind.parse()?;
    let params: HashMap<String, String> = params.into_iter().collect();

    let adapter = connect(config).await?;
    let command = CommandFactory::new(adapter).build(kind, &params)?;

    let mut task_config = TaskConfig::from(&config.engine);
    if let Some(secs) = timeout {
        task_config.timeout = Duration::from_secs(secs);
    }

    // Reboots are announced and confirmed on the bus.
    let events = Arc::new(EventManager::new());
    let handler = Arc::new(CommandHandler::new());
    if kind == CommandKind::Reboot {
        let logged = event_handler(|event| {
            tracing::info!(topic = event.topic(), payload = ?event.payload(), "Event");
            Ok(())
        });
        events.register_event_handler(topics::REBOOT_REQUESTED, logged.clone());
        events.register_event_handler(topics::REBOOT_COMPLETED, logged);

        let reboot = Arc::new(RebootProcessor::new(events.clone()));
        handler.register_processor(reboot.clone());
        reboot.request(params.get("sync").and_then(|v| parse_bool(v)).unwrap_or(true));
    }

    let (tx, rx) = oneshot::channel();
    let task = CommandTask::new(command)
        .with_config(task_config)
        .on_complete(move |command: &AnyCommand, result| {
            handler.handle_command(command, &result);
            let _ = tx.send(result);
        });

    let pool = WorkerPool::new(WorkerPoolConfig::from(&config.engine));
    let report = pool
        .run(task)
        .await
        .context("Worker stopped before the task finished")?;
    let result = rx.await.context("Task finished without a result")?;

    let output = json!({
        "report": &report,
        "data": result.data().map(|output| output.to_json()),
        "error": result.error(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if !report.success {
        anyhow::bail!("{} failed: {}", report.command, report.error.unwrap_or_default());
    }
    Ok(())
}

/// Topics logged by `monitor`.
const MONITORED_TOPICS: [&str; 13] = [
    topics::DEVICE_CONNECTION_CHANGED,
    topics::SESSION_STATE_CHANGED,
    topics::REBOOT_REQUESTED,
    topics::REBOOT_COMPLETED,
    topics::DEVICE_INFO_UPDATED,
    topics::SYMPHONY_STATUS_UPDATED,
    topics::SYMPHONY_GROUP_UPDATED,
    topics::SYMPHONY_VOLUME_UPDATED,
    topics::QS_STATE_CHANGED,
    topics::SYMPHONY_GROUP_STATE_CHANGED,
    topics::PREFERENCE_DATA_UPDATED,
    topics::NETWORK_INTERFACE_UPDATED,
    topics::CRASH_DETECTED,
];

/// Wire features to processors and poll until Ctrl-C.
async fn run_monitor(config: &AppConfig, interval: Option<u64>, features: Vec<String>) -> Result<()> {
    let adapter = Arc::new(AdbShellAdapter::from_config(&config.device));
    let events = Arc::new(EventManager::new());
    let handler = Arc::new(CommandHandler::new());
    let processors = ProcessorRegistry::new();
    let registry = FeatureRegistry::with_default_features();

    let enabled = if !features.is_empty() {
        features
    } else if !config.monitor.features.is_empty() {
        config.monitor.features.clone()
    } else {
        registry.enabled_features()
    };

    for feature in &enabled {
        match processors.get_or_create_builtin(feature, &events) {
            Some(processor) => {
                let bound = handler.register_processor(processor);
                tracing::info!(feature = %feature, kinds = bound, "Enabled feature");
            }
            None => tracing::warn!(feature = %feature, "Unknown feature, skipping"),
        }
    }

    // Subscribers attach once the bus is ready.
    events.add_ready_listener(|bus| {
        let log = event_handler(|event| {
            println!("{}", serde_json::to_string(event).unwrap_or_else(|_| event.topic().to_string()));
            Ok(())
        });
        for topic in MONITORED_TOPICS {
            bus.register_event_handler(topic, log.clone());
        }
    });
    events.set_ready();

    let kinds = registry.command_kinds_for_features(enabled.as_slice());
    if kinds.is_empty() {
        anyhow::bail!("No command kinds to poll; check the enabled features");
    }

    let factory = CommandFactory::new(adapter.clone());
    let pool = WorkerPool::new(WorkerPoolConfig::from(&config.engine));
    let task_config = TaskConfig::from(&config.engine);
    let period = Duration::from_secs(interval.unwrap_or(config.monitor.interval_secs).max(1));
    let mut ticker = tokio::time::interval(period);
    let mut connected = false;
    let mut session = MonitorSession::new(events.clone());
    session.start();

    tracing::info!(kinds = kinds.len(), interval_secs = period.as_secs(), "Monitoring started");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                session.stop();
                tracing::info!("Monitoring stopped");
                break;
            }
            _ = ticker.tick() => {
                let now_connected = adapter.refresh().await;
                if now_connected != connected {
                    connected = now_connected;
                    events.emit(Event::DeviceConnectionChanged {
                        connected,
                        device_serial: adapter.serial().unwrap_or_default().to_string(),
                        connection_type: "usb".to_string(),
                    });
                    session.device_connection_changed(connected);
                }
                if !connected || !session.is_running() {
                    tracing::debug!("Device not connected, skipping cycle");
                    continue;
                }
                poll_once(&factory, &pool, &handler, &kinds, &task_config).await;
            }
        }
    }

    processors.remove_bus(&events);
    Ok(())
}

/// Run every kind once and route the results.
async fn poll_once(
    factory: &CommandFactory,
    pool: &WorkerPool,
    handler: &Arc<CommandHandler>,
    kinds: &[CommandKind],
    task_config: &TaskConfig,
) {
    let mut running = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let command = match factory.build(*kind, &HashMap::new()) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "Failed to build command");
                continue;
            }
        };
        let handler = handler.clone();
        let task = CommandTask::new(command)
            .with_config(task_config.clone())
            .on_complete(move |command: &AnyCommand, result| {
                handler.handle_command(command, &result);
            });
        running.push(pool.submit(task));
    }

    for outcome in futures::future::join_all(running).await {
        match outcome {
            Ok(report) if !report.success => {
                tracing::debug!(command = report.command, error = ?report.error, "Poll failed");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Worker task failed"),
        }
    }
}
