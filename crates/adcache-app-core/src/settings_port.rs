// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Settings port shared by the cache core and its hosts.

use crate::config::{ConfigService, ConfigStore};
use crate::settings::CacheSettings;

/// Key under which [`CacheSettings`] are stored.
pub const SETTINGS_KEY: &str = "adcache";

/// Port for loading/saving cache settings.
pub trait SettingsPort {
    /// Load settings (defaults if missing or unreadable).
    fn load_settings(&self) -> CacheSettings;
    /// Persist settings (best-effort; failures are logged).
    fn save_settings(&self, settings: &CacheSettings);
}

impl<S> SettingsPort for ConfigService<S>
where
    S: ConfigStore,
{
    fn load_settings(&self) -> CacheSettings {
        self.load_or_default(SETTINGS_KEY)
    }

    fn save_settings(&self, settings: &CacheSettings) {
        if let Err(err) = self.save(SETTINGS_KEY, settings) {
            tracing::warn!(%err, "failed to persist cache settings");
        }
    }
}
