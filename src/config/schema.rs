//! Configuration schema for depcache
//!
//! Configuration is stored at `~/.config/depcache/config.toml`. Every
//! section is optional; environment variables and flags override the cache
//! paths given here.

use crate::backend::Granularity;
use crate::cache::VerifyDepth;
use crate::identifier::DEFAULT_NUGET_FEED;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Git object cache
    pub omnicache: OmnicacheConfig,

    /// External dependency cache
    pub extdep: ExtdepConfig,

    /// Eviction defaults for `cache gc`
    pub gc: GcConfig,

    /// Backend settings
    pub fetch: FetchConfig,
}

/// General application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Omnicache settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OmnicacheConfig {
    /// Bare repository used as the object cache (overridden by `OMNICACHE_PATH`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// "revision" fetches only the requested ref, "repository" mirrors the remote
    pub granularity: Granularity,

    /// "quick" checks the commit and tree, "full" walks every object
    pub verify: VerifyDepth,
}

/// Extdep cache settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtdepConfig {
    /// Cache root (overridden by `EXTDEP_CACHE_PATH`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Garbage collection defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Evict entries unused for N days (0 = disabled)
    pub max_age_days: u32,

    /// Evict least-recently-used entries beyond this size (0 = disabled)
    pub max_total_gb: u32,

    /// Staging directories older than this are removed
    pub stale_tmp_hours: u32,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            max_age_days: 30,
            max_total_gb: 50,
            stale_tmp_hours: 24,
        }
    }
}

/// Backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Whole-request timeout for HTTP downloads
    pub timeout_secs: u64,

    /// Feed used when a NuGet identifier names none
    pub nuget_feed: String,

    /// Concurrent fetches during `sync`
    pub jobs: usize,

    /// Git executable
    pub git: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            nuget_feed: DEFAULT_NUGET_FEED.to_string(),
            jobs: 4,
            git: "git".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[omnicache]"));
        assert!(toml.contains("granularity = \"revision\""));
        assert!(!toml.contains("path ="));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.gc.max_age_days, 30);
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [omnicache]
            path = "/srv/omnicache"
            granularity = "repository"
            verify = "full"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.omnicache.path, Some(PathBuf::from("/srv/omnicache")));
        assert_eq!(config.omnicache.granularity, Granularity::Repository);
        assert_eq!(config.omnicache.verify, VerifyDepth::Full);
        assert_eq!(config.fetch.timeout_secs, 300); // default preserved
    }

    #[test]
    fn verify_depth_accepts_tree() {
        let toml = r#"
            [omnicache]
            verify = "tree"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.omnicache.verify, VerifyDepth::Quick);
    }

    #[test]
    fn config_rejects_unknown_granularity() {
        let toml = r#"
            [omnicache]
            granularity = "object"
        "#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }
}
