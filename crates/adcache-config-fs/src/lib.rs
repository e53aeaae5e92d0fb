// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! On-disk settings for the ad cache.
//!
//! Layout: one pretty-printed JSON document per settings key, named
//! `<key>.json`, in a single flat directory. By default that directory is the
//! platform config dir for `adcache` (`~/.config/adcache` on Linux,
//! `~/Library/Application Support/dev.flyingrobots.adcache` on macOS). The
//! cache itself only ever reads and writes `adcache.json`.
//!
//! Saves go through a sibling `.<key>.json.tmp` file renamed over the target,
//! so a reader never observes a half-written document.

use adcache_app_core::config::{ConfigError, ConfigStore};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

/// Settings directory holding one `<key>.json` file per key.
#[derive(Debug, Clone)]
pub struct FsConfigStore {
    base: PathBuf,
}

impl FsConfigStore {
    /// Store in the platform config directory for `adcache`.
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from("dev", "flyingrobots", "adcache").ok_or_else(|| {
            ConfigError::Other("no home directory to place adcache settings in".into())
        })?;
        Self::with_base(dirs.config_dir())
    }

    /// Store in `base`, creating the directory if needed.
    pub fn with_base(base: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    /// Settings directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// File backing `key`. Keys are bare names; anything that could leave the
    /// settings directory is refused.
    pub fn settings_file(&self, key: &str) -> Result<PathBuf, ConfigError> {
        let bare = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !bare {
            return Err(ConfigError::Other(format!("invalid settings key `{key}`")));
        }
        Ok(self.base.join(format!("{key}.json")))
    }
}

impl ConfigStore for FsConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        match fs::read(self.settings_file(key)?) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(ConfigError::NotFound(key.to_owned()))
            }
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let target = self.settings_file(key)?;
        let staging = self.base.join(format!(".{key}.json.tmp"));
        fs::create_dir_all(&self.base)?;
        fs::write(&staging, data)?;
        if let Err(err) = fs::rename(&staging, &target) {
            let _ = fs::remove_file(&staging);
            return Err(ConfigError::Io(err));
        }
        Ok(())
    }
}
