//! Result routing tests.
//!
//! Tests include:
//! - Kind-based routing isolation between processors
//! - Default handler fallback
//! - A full monitor cycle: features select command kinds, the factory builds
//!   them, the pool runs them and the handler turns their results into bus
//!   events

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use qsmon_commands::commands::{SymphonyGroupCommand, SymphonyVolumeAddCommand};
use qsmon_commands::processors::{CrashMonitorProcessor, DefaultMonitorProcessor};
use qsmon_commands::testing::MockAdapter;
use qsmon_commands::{
    AnyCommand, Command, CommandFactory, CommandHandler, CommandKind, CommandMeta, CommandOutput,
    CommandResult, CommandTask, FeatureRegistry, FnProcessor, ProcessorError, ResultProcessor,
    WorkerPool, WorkerPoolConfig,
};
use qsmon_core::{event_handler, topics, Event, EventManager};

/// Processor counting every result it receives.
fn counting_processor(name: &str, kinds: Vec<CommandKind>, counter: Arc<AtomicUsize>) -> Arc<dyn ResultProcessor> {
    Arc::new(FnProcessor::new(name, kinds, move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<(), ProcessorError>(())
    }))
}

/// Record every event published on `topics_of_interest`.
fn record_events(bus: &EventManager, topics_of_interest: &[&str]) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler = event_handler(move |event| {
        sink.lock().push(event.clone());
        Ok(())
    });
    for topic in topics_of_interest {
        bus.register_event_handler(topic, handler.clone());
    }
    seen
}

#[test]
fn test_processor_only_sees_registered_kinds() {
    let adapter = Arc::new(MockAdapter::new());
    let handler = CommandHandler::new();
    let group_calls = Arc::new(AtomicUsize::new(0));
    handler.register_class_handler(
        CommandKind::SymphonyGroup,
        counting_processor("group", vec![CommandKind::SymphonyGroup], group_calls.clone()),
    );

    let group = SymphonyGroupCommand::new(adapter.clone());
    let volume = SymphonyVolumeAddCommand::new(adapter);

    let routed = handler.handle_command(
        &group,
        &CommandResult::success(CommandOutput::SymphonyGroup("Group".into())).with_issuer(group.identity()),
    );
    assert!(routed);

    // Unregistered kind: dropped, never delivered to the group processor.
    let routed = handler.handle_command(
        &volume,
        &CommandResult::success(CommandOutput::SymphonyVolume(2)).with_issuer(volume.identity()),
    );
    assert!(!routed);
    assert_eq!(group_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_first_registration_wins_and_default_fallback() {
    let adapter = Arc::new(MockAdapter::new());
    let handler = CommandHandler::new();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let fallback = Arc::new(AtomicUsize::new(0));

    assert!(handler.register_class_handler(
        CommandKind::SymphonyGroup,
        counting_processor("first", vec![CommandKind::SymphonyGroup], first.clone()),
    ));
    assert!(!handler.register_class_handler(
        CommandKind::SymphonyGroup,
        counting_processor("second", vec![CommandKind::SymphonyGroup], second.clone()),
    ));
    handler.register_default_handler(counting_processor("fallback", vec![], fallback.clone()));

    let group = SymphonyGroupCommand::new(adapter.clone());
    let volume = SymphonyVolumeAddCommand::new(adapter);
    let group_result = CommandResult::success(CommandOutput::SymphonyGroup("Stereo".into()));
    let volume_result = CommandResult::success(CommandOutput::SymphonyVolume(-1));

    assert!(handler.handle_with_default(&group, &group_result));
    assert!(handler.handle_with_default(&volume, &volume_result));
    // Plain routing never falls back.
    assert!(!handler.handle_command(&volume, &volume_result));

    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);
    assert_eq!(fallback.load(Ordering::SeqCst), 1);
}

/// Device answering every command a monitor cycle issues.
fn scripted_device() -> Arc<MockAdapter> {
    let adapter = Arc::new(MockAdapter::new());
    let dsp = |body: &str| {
        format!(
            "Calling remote procedure: `com.harman.dsp.GetAudioSetting`\nReceived call result:\n{}",
            body
        )
    };
    adapter.on_command("pp symphony group", dsp(r#"{"pos_args": [0]}"#));
    adapter.on_command("pp symphony volume add", dsp(r#"{"pos_args": [3]}"#));
    adapter.on_command(r#""pp symphony""#, dsp(r#"{"pos_args": [1, 4, 1]}"#));
    adapter.on_command(
        ".preference_data",
        r#"{"com.harman.acm_service.state": "PLAY", "db/waapp/multiroom_info": "grouptype=2 master=1", "db/waapp/multiroom_mode": "1"}"#,
    );
    adapter.on_command("systemd-coredump", "core.audiod.1000.zst\nREADME");
    adapter
}

#[tokio::test]
async fn test_monitor_cycle_publishes_events() {
    let adapter = scripted_device();
    let bus = Arc::new(EventManager::new());
    let seen = record_events(
        &bus,
        &[
            topics::SYMPHONY_GROUP_UPDATED,
            topics::SYMPHONY_VOLUME_UPDATED,
            topics::PREFERENCE_DATA_UPDATED,
            topics::CRASH_DETECTED,
        ],
    );

    let monitor = Arc::new(DefaultMonitorProcessor::new(bus.clone()));
    let crashes = Arc::new(CrashMonitorProcessor::new(bus.clone()));
    let handler = Arc::new(CommandHandler::new());
    assert_eq!(handler.register_processor(monitor.clone()), 4);
    assert_eq!(handler.register_processor(crashes.clone()), 1);

    let features = FeatureRegistry::with_default_features();
    let kinds = features.command_kinds_for_features(&[DefaultMonitorProcessor::FEATURE, CrashMonitorProcessor::FEATURE]);
    assert_eq!(kinds.len(), 5);

    let factory = CommandFactory::new(adapter.clone());
    let pool = WorkerPool::new(WorkerPoolConfig { max_concurrent: 2 });
    let mut running = Vec::new();
    for kind in kinds {
        let command = factory.build(kind, &HashMap::new()).unwrap();
        let handler = handler.clone();
        let task = CommandTask::new(command).on_complete(move |command: &AnyCommand, result| {
            handler.handle_command(command, &result);
        });
        running.push(pool.submit(task));
    }
    for report in running {
        assert!(report.await.unwrap().success);
    }

    let state = monitor.current_state();
    assert_eq!(state.qs_state, "On");
    assert_eq!(state.acm_service_state, "PLAY");
    assert_eq!(state.symphony_state, "On");
    assert!(monitor.is_symphony_active());
    assert_eq!(crashes.known_crash_count(), 1);

    let seen = seen.lock();
    assert!(seen.contains(&Event::SymphonyGroupUpdated {
        group_mode: "Q-Symphony".into()
    }));
    assert!(seen.contains(&Event::SymphonyVolumeUpdated { volume: Some(3) }));
    assert!(seen.contains(&Event::PreferenceDataUpdated {
        acm_service_state: "PLAY".into(),
        multiroom_grouptype: "2".into(),
        multiroom_mode: "1".into(),
    }));
    let crash_events: Vec<_> = seen
        .iter()
        .filter(|e| e.topic() == topics::CRASH_DETECTED)
        .collect();
    assert_eq!(crash_events.len(), 1);
}

#[tokio::test]
async fn test_repeated_crash_listing_is_reported_once() {
    let adapter = scripted_device();
    let bus = Arc::new(EventManager::new());
    let seen = record_events(&bus, &[topics::CRASH_DETECTED]);
    let handler = Arc::new(CommandHandler::new());
    handler.register_processor(Arc::new(CrashMonitorProcessor::new(bus.clone())));

    let factory = CommandFactory::new(adapter);
    for _ in 0..3 {
        let command = factory.build(CommandKind::CoredumpMonitor, &HashMap::new()).unwrap();
        let result = command.execute().await;
        assert!(handler.handle_command(&command, &result));
    }

    assert_eq!(seen.lock().len(), 1);
}
