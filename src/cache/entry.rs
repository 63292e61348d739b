//! Cache entry metadata
//!
//! An entry is a directory named after its fingerprint holding `entry.json`
//! and, for blob entries, the `object` file. Once published it is never
//! rewritten; only the `last-used` marker next to it is touched.

use crate::cache::fingerprint::Fingerprint;
use crate::identifier::ArtifactIdentifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current on-disk entry format
pub const ENTRY_FORMAT: u32 = 1;

/// Metadata file inside an entry directory
pub const METADATA_FILE: &str = "entry.json";

/// Blob file inside an entry directory
pub const OBJECT_FILE: &str = "object";

/// Access marker inside an entry directory
pub const LAST_USED_FILE: &str = "last-used";

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Convert GB to bytes
pub fn gb_to_bytes(gb: u32) -> u64 {
    u64::from(gb) * 1024 * 1024 * 1024
}

/// What the entry's integrity is checked against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Integrity {
    /// SHA-256 of the stored blob
    Blob { sha256: String },
    /// Commit pinned in the Omnicache and its root tree
    Commit { commit: String, tree: String },
}

impl Integrity {
    /// Content digest shown to users and written to state files
    pub fn digest(&self) -> &str {
        match self {
            Self::Blob { sha256 } => sha256,
            Self::Commit { commit, .. } => commit,
        }
    }
}

/// Persisted metadata (`entry.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub format: u32,
    pub fingerprint: Fingerprint,
    pub identifier: ArtifactIdentifier,
    pub integrity: Integrity,
    /// Blob size; zero for commit entries, whose objects live in git
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    /// When the content was last checked against `integrity` before publishing
    pub validated_at: DateTime<Utc>,
}

impl EntryMetadata {
    /// Metadata for an entry being published now
    pub fn new(
        fingerprint: Fingerprint,
        identifier: ArtifactIdentifier,
        integrity: Integrity,
        size_bytes: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            format: ENTRY_FORMAT,
            fingerprint,
            identifier,
            integrity,
            size_bytes,
            created_at: now,
            validated_at: now,
        }
    }
}

/// A published entry as seen by readers
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub metadata: EntryMetadata,
    /// Entry directory
    pub dir: PathBuf,
    /// Last time a fetch was served from this entry, if recorded
    pub last_used: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.metadata.fingerprint
    }

    /// Path of the stored blob
    pub fn object_path(&self) -> PathBuf {
        self.dir.join(OBJECT_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// Most recent use, falling back to creation time
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_used
            .map(|used| used.max(self.metadata.created_at))
            .unwrap_or(self.metadata.created_at)
    }
}

/// Read the `last-used` marker of an entry directory
pub(crate) fn read_last_used(dir: &Path) -> Option<DateTime<Utc>> {
    let raw = std::fs::read_to_string(dir.join(LAST_USED_FILE)).ok()?;
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
