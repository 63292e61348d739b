//! NuGet registry backend
//!
//! Resolves a v3 service index to its flat container (`PackageBaseAddress`)
//! and downloads the `.nupkg` for one package version.

use crate::backend::http::HttpTransport;
use crate::error::{DepcacheError, DepcacheResult};
use crate::identifier::{NugetSpec, DEFAULT_NUGET_FEED};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const PACKAGE_BASE_ADDRESS: &str = "PackageBaseAddress/3.0.0";

#[derive(Debug, Deserialize)]
struct ServiceIndex {
    #[serde(default)]
    resources: Vec<ServiceResource>,
}

#[derive(Debug, Deserialize)]
struct ServiceResource {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@type")]
    kind: ResourceType,
}

/// `@type` is either a string or a list of strings
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResourceType {
    One(String),
    Many(Vec<String>),
}

impl ResourceType {
    fn is(&self, wanted: &str) -> bool {
        match self {
            Self::One(kind) => kind == wanted,
            Self::Many(kinds) => kinds.iter().any(|k| k == wanted),
        }
    }
}

/// Downloads packages from a NuGet v3 feed
#[derive(Clone)]
pub struct NugetBackend {
    http: Arc<dyn HttpTransport>,
}

impl NugetBackend {
    pub fn new(http: Arc<dyn HttpTransport>) -> Self {
        Self { http }
    }

    /// Flat-container base URL for a feed
    ///
    /// A feed ending in `index.json` is a service index and is resolved; any
    /// other feed URL is taken as the flat-container base itself.
    pub async fn package_base(&self, feed: &str) -> DepcacheResult<String> {
        if !feed.trim_end_matches('/').ends_with("index.json") {
            return Ok(feed.trim_end_matches('/').to_string());
        }

        let raw = self.http.get_bytes(feed).await?;
        let index: ServiceIndex =
            serde_json::from_slice(&raw).map_err(|e| DepcacheError::RemoteUnavailable {
                remote: feed.to_string(),
                reason: format!("malformed service index: {}", e),
            })?;

        let base = index
            .resources
            .iter()
            .find(|r| r.kind.is(PACKAGE_BASE_ADDRESS))
            .map(|r| r.id.trim_end_matches('/').to_string())
            .ok_or_else(|| DepcacheError::RemoteUnavailable {
                remote: feed.to_string(),
                reason: format!("service index has no {} resource", PACKAGE_BASE_ADDRESS),
            })?;

        debug!(feed, base = %base, "Resolved NuGet package base address");
        Ok(base)
    }

    /// Download the `.nupkg` for `spec` into `dest`
    pub async fn download(&self, spec: &NugetSpec, dest: &Path) -> DepcacheResult<u64> {
        let feed = spec.feed.as_deref().unwrap_or(DEFAULT_NUGET_FEED);
        let base = self.package_base(feed).await?;
        let url = package_url(&base, &spec.name, &spec.version);

        match self.http.download(&url, dest).await {
            Err(DepcacheError::NotFound(_)) => Err(DepcacheError::NotFound(format!(
                "package {} {} on {}",
                spec.name, spec.version, feed
            ))),
            other => other,
        }
    }
}

/// Flat-container URL of a package version
pub fn package_url(base: &str, name: &str, version: &str) -> String {
    let id = name.to_ascii_lowercase();
    let version = normalize_version(version);
    format!("{}/{}/{}/{}.{}.nupkg", base, id, version, id, version)
}

/// Lowercase and drop build metadata, as the flat container expects
fn normalize_version(version: &str) -> String {
    version
        .split('+')
        .next()
        .unwrap_or(version)
        .trim()
        .to_ascii_lowercase()
}
