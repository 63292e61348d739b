//! Artifact identifiers
//!
//! An identifier names what is being fetched. It never changes once issued;
//! the cache key and the backend are both derived from it.

use crate::error::{DepcacheError, DepcacheResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default NuGet v3 service index
pub const DEFAULT_NUGET_FEED: &str = "https://api.nuget.org/v3/index.json";

/// What to fetch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ArtifactIdentifier {
    /// A revision of a git remote
    Git(GitSpec),
    /// A package from a NuGet feed
    Nuget(NugetSpec),
    /// A file downloaded from a URL
    Web(WebSpec),
}

/// Git remote and reference (branch, tag, full ref name, or commit id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GitSpec {
    pub url: String,
    pub reference: String,
}

/// NuGet package coordinates
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NugetSpec {
    pub name: String,
    pub version: String,
    /// Service index or flat-container base URL (defaults to nuget.org)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed: Option<String>,
    /// Expected SHA-256 of the `.nupkg`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Generic download
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebSpec {
    pub url: String,
    pub name: String,
    pub version: String,
    /// Expected SHA-256 of the downloaded file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default)]
    pub archive: ArchiveKind,
    /// Subtree of the archive to place at the destination root, or the file
    /// name to use for a plain download
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_path: Option<String>,
}

/// How a downloaded file is laid out at its destination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveKind {
    /// Placed as-is
    #[default]
    None,
    /// Gzip-compressed tarball
    #[serde(alias = "tar.gz", alias = "tgz")]
    TarGz,
    /// Zip archive
    Zip,
}

impl ArchiveKind {
    /// Parse the `compression_type` field used by descriptors
    pub fn from_descriptor(value: Option<&str>) -> DepcacheResult<Self> {
        match value.map(str::to_ascii_lowercase).as_deref() {
            None | Some("") | Some("none") => Ok(Self::None),
            Some("tar.gz") | Some("tgz") | Some("tar-gz") => Ok(Self::TarGz),
            Some("zip") => Ok(Self::Zip),
            Some(other) => Err(DepcacheError::InvalidIdentifier(format!(
                "unsupported compression type '{}'",
                other
            ))),
        }
    }

    /// Stable name used in key material and display
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::TarGz => "tar.gz",
            Self::Zip => "zip",
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ArtifactIdentifier {
    /// Build a git identifier
    pub fn git(url: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::Git(GitSpec {
            url: url.into(),
            reference: reference.into(),
        })
    }

    /// Build a NuGet identifier for the default feed
    pub fn nuget(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::Nuget(NugetSpec {
            name: name.into(),
            version: version.into(),
            feed: None,
            sha256: None,
        })
    }

    /// Short kind label
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Git(_) => "git",
            Self::Nuget(_) => "nuget",
            Self::Web(_) => "web",
        }
    }

    /// Declared content hash, if the identifier carries one
    pub fn declared_sha256(&self) -> Option<&str> {
        match self {
            Self::Git(_) => None,
            Self::Nuget(spec) => spec.sha256.as_deref(),
            Self::Web(spec) => spec.sha256.as_deref(),
        }
    }

    /// Check that the identifier is well formed before any I/O happens
    pub fn validate(&self) -> DepcacheResult<()> {
        match self {
            Self::Git(spec) => {
                require_non_empty("git url", &spec.url)?;
                require_non_empty("git reference", &spec.reference)?;
                if spec.reference.starts_with('-') || spec.url.starts_with('-') {
                    return Err(DepcacheError::InvalidIdentifier(format!(
                        "git arguments must not start with '-': {}",
                        self
                    )));
                }
            }
            Self::Nuget(spec) => {
                require_non_empty("package name", &spec.name)?;
                require_non_empty("package version", &spec.version)?;
                if spec.name.contains('/') || spec.version.contains('/') {
                    return Err(DepcacheError::InvalidIdentifier(format!(
                        "package coordinates must not contain '/': {}",
                        self
                    )));
                }
            }
            Self::Web(spec) => {
                require_non_empty("url", &spec.url)?;
                let scheme_ok = ["http://", "https://", "file://"]
                    .iter()
                    .any(|s| spec.url.starts_with(s));
                if !scheme_ok {
                    return Err(DepcacheError::InvalidIdentifier(format!(
                        "unsupported url scheme: {}",
                        spec.url
                    )));
                }
            }
        }

        if let Some(hash) = self.declared_sha256() {
            if !is_sha256_hex(hash) {
                return Err(DepcacheError::InvalidIdentifier(format!(
                    "sha256 must be 64 hex characters, got '{}'",
                    hash
                )));
            }
        }

        Ok(())
    }
}

impl fmt::Display for ArtifactIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Git(spec) => write!(f, "git {}@{}", spec.url, spec.reference),
            Self::Nuget(spec) => write!(f, "nuget {} {}", spec.name, spec.version),
            Self::Web(spec) => write!(f, "web {} {} ({})", spec.name, spec.version, spec.url),
        }
    }
}

impl WebSpec {
    /// File name used when placing a plain download
    pub fn file_name(&self) -> String {
        if let Some(path) = self.internal_path.as_deref() {
            let trimmed = path.trim_matches('/');
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }

        self.url
            .split(['?', '#'])
            .next()
            .and_then(|u| u.rsplit('/').next())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.name.clone())
    }
}

/// Whether a reference is a full commit id (SHA-1 or SHA-256 object format)
pub fn is_full_commit_id(reference: &str) -> bool {
    (reference.len() == 40 || reference.len() == 64)
        && reference.chars().all(|c| c.is_ascii_hexdigit())
}

/// Whether a string is a SHA-256 hex digest
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn require_non_empty(what: &str, value: &str) -> DepcacheResult<()> {
    if value.trim().is_empty() {
        return Err(DepcacheError::InvalidIdentifier(format!(
            "{} cannot be empty",
            what
        )));
    }
    Ok(())
}
