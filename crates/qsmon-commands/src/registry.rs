//! Feature catalogue and shared processor instances.
//!
//! A feature is a named consumer that owns a set of command kinds (and, for
//! the built-in ones, a result processor). [`FeatureRegistry`] answers which
//! kinds must be polled for a set of enabled features; [`ProcessorRegistry`]
//! hands out one processor per (feature, event bus) pair so that several
//! views on the same bus share state.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;

use qsmon_core::EventManager;

use crate::command::CommandKind;
use crate::handler::ResultProcessor;
use crate::processors::{
    CrashMonitorProcessor, DefaultMonitorProcessor, DeviceInfoProcessor, NetworkMonitorProcessor,
    RebootProcessor,
};

/// Build the processor for a built-in feature.
pub fn builtin_processor(feature: &str, events: Arc<EventManager>) -> Option<Arc<dyn ResultProcessor>> {
    let processor: Arc<dyn ResultProcessor> = match feature {
        DefaultMonitorProcessor::FEATURE => Arc::new(DefaultMonitorProcessor::new(events)),
        NetworkMonitorProcessor::FEATURE => Arc::new(NetworkMonitorProcessor::new(events)),
        CrashMonitorProcessor::FEATURE => Arc::new(CrashMonitorProcessor::new(events)),
        DeviceInfoProcessor::FEATURE => Arc::new(DeviceInfoProcessor::new(events)),
        RebootProcessor::FEATURE => Arc::new(RebootProcessor::new(events)),
        _ => return None,
    };
    Some(processor)
}

/// Shared processor instances keyed by feature name and event bus.
#[derive(Default)]
pub struct ProcessorRegistry {
    instances: DashMap<(String, u64), Arc<dyn ResultProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the processor for `(feature, events)`, creating it with
    /// `create` on first use.
    pub fn get_or_create<F>(&self, feature: &str, events: &Arc<EventManager>, create: F) -> Arc<dyn ResultProcessor>
    where
        F: FnOnce(Arc<EventManager>) -> Arc<dyn ResultProcessor>,
    {
        let key = (feature.to_string(), events.id());
        if let Some(existing) = self.instances.get(&key) {
            return existing.clone();
        }
        // Built outside the map lock so `create` may use the registry.
        tracing::debug!(feature, bus = events.id(), "Creating shared processor");
        let processor = create(events.clone());
        self.instances.entry(key).or_insert(processor).clone()
    }

    /// Shared processor for a built-in feature.
    pub fn get_or_create_builtin(&self, feature: &str, events: &Arc<EventManager>) -> Option<Arc<dyn ResultProcessor>> {
        let key = (feature.to_string(), events.id());
        if let Some(existing) = self.instances.get(&key) {
            return Some(existing.clone());
        }
        let processor = builtin_processor(feature, events.clone())?;
        Some(self.instances.entry(key).or_insert(processor).clone())
    }

    pub fn get(&self, feature: &str, events: &EventManager) -> Option<Arc<dyn ResultProcessor>> {
        self.instances
            .get(&(feature.to_string(), events.id()))
            .map(|entry| entry.clone())
    }

    /// Drop every instance bound to `events`.
    pub fn remove_bus(&self, events: &EventManager) {
        let id = events.id();
        self.instances.retain(|(_, bus), _| *bus != id);
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn clear(&self) {
        self.instances.clear();
    }
}

#[derive(Debug, Clone)]
struct FeatureEntry {
    kinds: Vec<CommandKind>,
    enabled: bool,
}

/// Registered feature as reported by [`FeatureRegistry::registered_features`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureSummary {
    pub name: String,
    pub enabled: bool,
    pub kinds: Vec<CommandKind>,
}

/// Which command kinds each feature needs.
#[derive(Debug, Default)]
pub struct FeatureRegistry {
    features: RwLock<BTreeMap<String, FeatureEntry>>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in features.
    pub fn with_default_features() -> Self {
        let registry = Self::new();
        registry.register_feature(
            DefaultMonitorProcessor::FEATURE,
            vec![
                CommandKind::PreferenceData,
                CommandKind::SymphonyStatus,
                CommandKind::SymphonyGroup,
                CommandKind::SymphonyVolumeAdd,
            ],
        );
        registry.register_feature(NetworkMonitorProcessor::FEATURE, vec![CommandKind::NetworkInterface]);
        registry.register_feature(CrashMonitorProcessor::FEATURE, vec![CommandKind::CoredumpMonitor]);
        registry.register_feature(DeviceInfoProcessor::FEATURE, vec![CommandKind::GetDeviceInfo]);
        registry
    }

    /// Register or replace a feature. New features start enabled.
    pub fn register_feature(&self, name: &str, kinds: Vec<CommandKind>) {
        let mut features = self.features.write();
        if features.contains_key(name) {
            tracing::debug!(feature = name, "Feature already registered, updating");
        }
        tracing::debug!(feature = name, kinds = kinds.len(), "Registered feature");
        features.insert(name.to_string(), FeatureEntry { kinds, enabled: true });
    }

    pub fn enable_feature(&self, name: &str) -> bool {
        self.set_enabled(name, true)
    }

    pub fn disable_feature(&self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.features.write().get_mut(name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.features.read().get(name).is_some_and(|e| e.enabled)
    }

    /// Deduplicated kinds of the named features, in first-seen order.
    /// Unknown and disabled features are skipped.
    pub fn command_kinds_for_features<S: AsRef<str>>(&self, names: &[S]) -> Vec<CommandKind> {
        let features = self.features.read();
        let mut kinds = Vec::new();
        for name in names {
            let name = name.as_ref();
            match features.get(name) {
                Some(entry) if entry.enabled => {
                    for kind in &entry.kinds {
                        if !kinds.contains(kind) {
                            kinds.push(*kind);
                        }
                    }
                }
                Some(_) => tracing::debug!(feature = name, "Skipped disabled feature"),
                None => tracing::debug!(feature = name, "Feature not found"),
            }
        }
        kinds
    }

    /// Kinds of every enabled feature.
    pub fn all_command_kinds(&self) -> Vec<CommandKind> {
        let names = self.enabled_features();
        self.command_kinds_for_features(names.as_slice())
    }

    pub fn enabled_features(&self) -> Vec<String> {
        self.features
            .read()
            .iter()
            .filter(|(_, e)| e.enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn registered_features(&self) -> Vec<FeatureSummary> {
        self.features
            .read()
            .iter()
            .map(|(name, e)| FeatureSummary {
                name: name.clone(),
                enabled: e.enabled,
                kinds: e.kinds.clone(),
            })
            .collect()
    }

    pub fn clear(&self) {
        self.features.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_deduplicated_and_disabled_skipped() {
        let registry = FeatureRegistry::with_default_features();
        registry.register_feature("Dashboard", vec![CommandKind::SymphonyStatus, CommandKind::GetDeviceInfo]);

        let kinds = registry.command_kinds_for_features(&["DefaultMonitor", "Dashboard", "Missing"]);
        assert_eq!(
            kinds,
            vec![
                CommandKind::PreferenceData,
                CommandKind::SymphonyStatus,
                CommandKind::SymphonyGroup,
                CommandKind::SymphonyVolumeAdd,
                CommandKind::GetDeviceInfo,
            ]
        );

        assert!(registry.disable_feature("Dashboard"));
        assert!(registry.command_kinds_for_features(&["Dashboard"]).is_empty());
        assert!(!registry.disable_feature("Missing"));
    }

    #[test]
    fn test_all_command_kinds() {
        let registry = FeatureRegistry::with_default_features();
        registry.disable_feature("CrashMonitor");
        let kinds = registry.all_command_kinds();
        assert!(!kinds.contains(&CommandKind::CoredumpMonitor));
        assert!(kinds.contains(&CommandKind::NetworkInterface));
        assert_eq!(registry.registered_features().len(), 4);

        registry.clear();
        assert!(registry.all_command_kinds().is_empty());
    }

    #[test]
    fn test_processor_shared_per_bus() {
        let registry = ProcessorRegistry::new();
        let bus_a = Arc::new(EventManager::new());
        let bus_b = Arc::new(EventManager::new());

        let first = registry.get_or_create_builtin("NetworkMonitor", &bus_a).unwrap();
        let again = registry.get_or_create_builtin("NetworkMonitor", &bus_a).unwrap();
        let other = registry.get_or_create_builtin("NetworkMonitor", &bus_b).unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.len(), 2);
        assert!(registry.get_or_create_builtin("Unknown", &bus_a).is_none());

        registry.remove_bus(&bus_a);
        assert_eq!(registry.len(), 1);
        assert!(registry.get("NetworkMonitor", &bus_b).is_some());
    }

    #[test]
    fn test_reboot_is_builtin_but_never_polled() {
        let registry = ProcessorRegistry::new();
        let bus = Arc::new(EventManager::new());
        let reboot = registry.get_or_create_builtin("Reboot", &bus).unwrap();
        assert_eq!(reboot.handled_kinds(), &[CommandKind::Reboot]);

        let features = FeatureRegistry::with_default_features();
        assert!(!features.all_command_kinds().contains(&CommandKind::Reboot));
    }

    #[test]
    fn test_create_may_use_the_registry() {
        let registry = Arc::new(ProcessorRegistry::new());
        let bus = Arc::new(EventManager::new());

        let inner = registry.clone();
        let outer = registry.get_or_create("Composite", &bus, |events| {
            // Nested lookup on the same registry while building.
            inner.get_or_create_builtin("DeviceInfo", &events).unwrap()
        });

        assert_eq!(registry.len(), 2);
        assert!(Arc::ptr_eq(&outer, &registry.get("DeviceInfo", &bus).unwrap()));
    }
}
