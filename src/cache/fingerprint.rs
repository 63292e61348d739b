//! Cache keys derived from artifact identifiers
//!
//! A fingerprint is the SHA-256 of a versioned, length-prefixed encoding of
//! every field of the identifier. Length prefixes keep field boundaries
//! unambiguous, so `("ab", "c")` and `("a", "bc")` never hash alike.

use crate::error::{DepcacheError, DepcacheResult};
use crate::identifier::{ArtifactIdentifier, DEFAULT_NUGET_FEED};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Domain separator; bump the version when the key material changes
const DOMAIN: &[u8] = b"depcache/fingerprint/v1";

/// Hex-encoded SHA-256 cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parse a fingerprint from its hex form
    pub fn parse(value: &str) -> DepcacheResult<Self> {
        if value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(value.to_ascii_lowercase()))
        } else {
            Err(DepcacheError::User(format!(
                "'{}' is not a fingerprint (expected 64 hex characters)",
                value
            )))
        }
    }

    /// Full hex form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for display
    pub fn short(&self) -> &str {
        &self.0[..12]
    }

    /// Two-character shard directory name
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = DepcacheError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

/// Derives cache keys from identifiers
///
/// `resolved_commit` carries the commit a git reference resolved to, so a
/// branch that moves gets a new key instead of overwriting an entry.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, id: &ArtifactIdentifier, resolved_commit: Option<&str>) -> Fingerprint;
}

/// Default fingerprint scheme
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Fingerprinter;

impl Fingerprinter for Sha256Fingerprinter {
    fn fingerprint(&self, id: &ArtifactIdentifier, resolved_commit: Option<&str>) -> Fingerprint {
        let mut hasher = KeyHasher::new();

        match id {
            ArtifactIdentifier::Git(spec) => {
                hasher.field("kind", Some("git"));
                hasher.field("url", Some(&spec.url));
                hasher.field("reference", Some(&spec.reference));
                let commit = resolved_commit.map(str::to_ascii_lowercase);
                hasher.field("commit", commit.as_deref());
            }
            ArtifactIdentifier::Nuget(spec) => {
                hasher.field("kind", Some("nuget"));
                hasher.field("name", Some(&spec.name));
                hasher.field("version", Some(&spec.version));
                hasher.field(
                    "feed",
                    Some(spec.feed.as_deref().unwrap_or(DEFAULT_NUGET_FEED)),
                );
                let sha = spec.sha256.as_deref().map(str::to_ascii_lowercase);
                hasher.field("sha256", sha.as_deref());
            }
            ArtifactIdentifier::Web(spec) => {
                hasher.field("kind", Some("web"));
                hasher.field("url", Some(&spec.url));
                hasher.field("name", Some(&spec.name));
                hasher.field("version", Some(&spec.version));
                let sha = spec.sha256.as_deref().map(str::to_ascii_lowercase);
                hasher.field("sha256", sha.as_deref());
                hasher.field("archive", Some(spec.archive.as_str()));
                hasher.field("internal_path", spec.internal_path.as_deref());
            }
        }

        hasher.finish()
    }
}

struct KeyHasher(Sha256);

impl KeyHasher {
    fn new() -> Self {
        let mut hasher = Sha256::new();
        hasher.update((DOMAIN.len() as u32).to_le_bytes());
        hasher.update(DOMAIN);
        Self(hasher)
    }

    fn field(&mut self, name: &str, value: Option<&str>) {
        self.0.update((name.len() as u32).to_le_bytes());
        self.0.update(name.as_bytes());
        match value {
            Some(value) => {
                self.0.update([1u8]);
                self.0.update((value.len() as u64).to_le_bytes());
                self.0.update(value.as_bytes());
            }
            None => self.0.update([0u8]),
        }
    }

    fn finish(self) -> Fingerprint {
        Fingerprint(hex::encode(self.0.finalize()))
    }
}

/// Stable key for a git remote, used to namespace refs in the Omnicache
///
/// Unlike a fingerprint this normalizes the URL, so `https://host/repo.git`
/// and `https://host/repo/` share objects.
pub fn repository_key(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let normalized = match trimmed.split_once("://") {
        Some((scheme, rest)) => {
            let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
            format!(
                "{}://{}/{}",
                scheme.to_ascii_lowercase(),
                host.to_ascii_lowercase(),
                path
            )
        }
        None => trimmed.to_string(),
    };

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}
