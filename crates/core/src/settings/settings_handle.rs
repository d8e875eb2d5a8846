use std::sync::{Arc, RwLock};

use super::settings_model::EngineSettings;

/// Shared, replaceable settings.
///
/// Readers take a snapshot at the start of each cycle, so a replacement
/// applies from the next cycle without restarting anything.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<EngineSettings>>,
}

impl SettingsHandle {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn snapshot(&self) -> EngineSettings {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn replace(&self, settings: EngineSettings) {
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = settings;
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut EngineSettings),
    {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let handle = SettingsHandle::default();
        let other = handle.clone();

        other.update(|s| s.set_enabled("TIINGO", false));
        assert!(!handle.snapshot().is_enabled("TIINGO"));

        handle.replace(EngineSettings::default());
        assert!(other.snapshot().is_enabled("TIINGO"));
    }
}
