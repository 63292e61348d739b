//! Configuration management for depcache

pub mod schema;

pub use schema::Config;

use crate::error::{DepcacheError, DepcacheResult};
use crate::fetcher::CacheSettings;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("depcache")
            .join("config.toml")
    }

    /// Load configuration, falling back to defaults if the file is missing
    pub async fn load(&self) -> DepcacheResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> DepcacheResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| DepcacheError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| DepcacheError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> DepcacheResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            DepcacheError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> DepcacheResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DepcacheError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache roots given on the command line or in the environment
#[derive(Debug, Clone, Default)]
pub struct CacheOverrides {
    pub omnicache: Option<PathBuf>,
    pub extdep: Option<PathBuf>,
    pub no_cache: bool,
}

/// Combine overrides with the config file into the settings for this run
///
/// Flags and environment win over the file. Empty paths count as unset.
pub fn resolve_cache_settings(config: &Config, overrides: &CacheOverrides) -> CacheSettings {
    if overrides.no_cache {
        debug!("Caching disabled (--no-cache)");
        return CacheSettings {
            granularity: config.omnicache.granularity,
            verify: config.omnicache.verify,
            ..CacheSettings::disabled()
        };
    }

    let pick = |flag: &Option<PathBuf>, file: &Option<PathBuf>| {
        flag.clone()
            .filter(|p| !p.as_os_str().is_empty())
            .or_else(|| file.clone())
            .filter(|p| !p.as_os_str().is_empty())
    };

    let settings = CacheSettings {
        omnicache: pick(&overrides.omnicache, &config.omnicache.path),
        extdep: pick(&overrides.extdep, &config.extdep.path),
        granularity: config.omnicache.granularity,
        verify: config.omnicache.verify,
    };
    debug!(?settings, "Resolved cache settings");
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.toml");
        let manager = ConfigManager::with_path(path);

        let config = manager.load().await.unwrap();
        assert_eq!(config, Config::default());
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");
        let manager = ConfigManager::with_path(path);

        let mut config = Config::default();
        config.extdep.path = Some(PathBuf::from("/srv/extdep"));

        manager.save(&config).await.unwrap();
        let loaded = manager.load().await.unwrap();

        assert_eq!(loaded.extdep.path, Some(PathBuf::from("/srv/extdep")));
    }

    #[tokio::test]
    async fn invalid_file_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[gc]\nmax_age_days = \"soon\"\n").unwrap();

        let err = ConfigManager::with_path(path).load().await.unwrap_err();
        assert!(matches!(err, DepcacheError::ConfigInvalid { .. }));
    }

    #[test]
    fn overrides_win_over_file() {
        let mut config = Config::default();
        config.omnicache.path = Some(PathBuf::from("/file/omni"));
        config.extdep.path = Some(PathBuf::from("/file/extdep"));

        let overrides = CacheOverrides {
            omnicache: Some(PathBuf::from("/env/omni")),
            ..CacheOverrides::default()
        };
        let settings = resolve_cache_settings(&config, &overrides);
        assert_eq!(settings.omnicache, Some(PathBuf::from("/env/omni")));
        assert_eq!(settings.extdep, Some(PathBuf::from("/file/extdep")));
    }

    #[test]
    fn empty_values_are_unset() {
        let overrides = CacheOverrides {
            omnicache: Some(PathBuf::new()),
            ..CacheOverrides::default()
        };
        let settings = resolve_cache_settings(&Config::default(), &overrides);
        assert_eq!(settings, CacheSettings::disabled());
    }

    #[test]
    fn no_cache_disables_everything() {
        let mut config = Config::default();
        config.extdep.path = Some(PathBuf::from("/file/extdep"));
        let overrides = CacheOverrides {
            extdep: Some(PathBuf::from("/env/extdep")),
            no_cache: true,
            ..CacheOverrides::default()
        };
        let settings = resolve_cache_settings(&config, &overrides);
        assert!(settings.omnicache.is_none());
        assert!(settings.extdep.is_none());
    }
}
