use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::config::SettingsConfig;
use crate::settings::Settings;

/// Shares one [`Settings`] instance per distinct configuration.
///
/// Owned by the caller and passed where needed; there is no process-wide
/// settings state.
#[derive(Debug, Default)]
pub struct SettingsCache {
    entries: Mutex<HashMap<SettingsConfig, Arc<Settings>>>,
}

impl SettingsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The settings for `config`, creating them on first request.
    pub fn get_or_create(&self, config: &SettingsConfig) -> Arc<Settings> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(settings) = entries.get(config) {
            return Arc::clone(settings);
        }
        debug!(policy = %config.reference_handling, "creating settings");
        let settings = Arc::new(Settings::from_config(config.clone()));
        entries.insert(config.clone(), Arc::clone(&settings));
        settings
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphdelta_types::ReferenceHandling;

    #[test]
    fn same_config_shares_instance() {
        let cache = SettingsCache::new();
        let a = cache.get_or_create(&SettingsConfig::default());
        let b = cache.get_or_create(&SettingsConfig::default());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn different_configs_get_different_instances() {
        let cache = SettingsCache::new();
        let a = cache.get_or_create(&SettingsConfig::default());
        let b = cache.get_or_create(&SettingsConfig::with_reference_handling(
            ReferenceHandling::ReferencesOnly,
        ));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.reference_handling(), ReferenceHandling::ReferencesOnly);
        assert_eq!(cache.len(), 2);
    }
}
