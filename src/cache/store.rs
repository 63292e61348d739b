//! Identity-addressed entry store
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/
//! ├── entries/
//! │   └── ab/
//! │       └── abcdef…/          # one published entry per fingerprint
//! │           ├── entry.json
//! │           ├── object        # blob entries only
//! │           └── last-used
//! ├── tmp/                      # staging, never read as entries
//! └── quarantine/               # entries that failed verification
//! ```
//!
//! An entry is assembled completely inside `tmp/` and published with a single
//! directory rename, so readers either see the whole entry or nothing. Two
//! writers racing on one fingerprint both succeed: the first rename wins and
//! the loser discards its staging directory.

use crate::cache::entry::{
    read_last_used, CacheEntry, EntryMetadata, LAST_USED_FILE, METADATA_FILE, OBJECT_FILE,
};
use crate::cache::fingerprint::Fingerprint;
use crate::error::{DepcacheError, DepcacheResult};
use chrono::Utc;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, trace, warn};
use uuid::Uuid;

const ENTRIES_DIR: &str = "entries";
const TMP_DIR: &str = "tmp";
const QUARANTINE_DIR: &str = "quarantine";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Aggregate numbers for a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub quarantined: usize,
}

/// Filesystem-backed entry store rooted at one directory
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Open (and lay out if needed) a store at `root`
    ///
    /// Fails with `CacheUnavailable` when the root cannot be created or
    /// written, which callers treat as "cache disabled for this run".
    pub fn open(root: impl Into<PathBuf>) -> DepcacheResult<Self> {
        let root = root.into();
        for dir in [ENTRIES_DIR, TMP_DIR, QUARANTINE_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .map_err(|e| DepcacheError::cache_unavailable(&path, e))?;
        }
        debug!("Opened cache store at {}", root.display());
        Ok(Self { root })
    }

    /// Get the store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a published entry lives in
    pub fn entry_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root
            .join(ENTRIES_DIR)
            .join(fingerprint.shard())
            .join(fingerprint.as_str())
    }

    /// Look up a published entry
    pub fn get(&self, fingerprint: &Fingerprint) -> DepcacheResult<Option<CacheEntry>> {
        let dir = self.entry_dir(fingerprint);
        let path = dir.join(METADATA_FILE);

        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!(fingerprint = %fingerprint.short(), "Cache miss");
                return Ok(None);
            }
            Err(e) => return Err(DepcacheError::cache_unavailable(&path, e)),
        };

        let metadata: EntryMetadata =
            serde_json::from_slice(&raw).map_err(|e| DepcacheError::CacheEntryMalformed {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if &metadata.fingerprint != fingerprint {
            return Err(DepcacheError::CacheEntryMalformed {
                path,
                reason: format!("entry records fingerprint {}", metadata.fingerprint),
            });
        }

        trace!(fingerprint = %fingerprint.short(), "Cache hit");
        Ok(Some(CacheEntry {
            last_used: read_last_used(&dir),
            metadata,
            dir,
        }))
    }

    /// Create a private staging directory for a new entry
    ///
    /// Backends download into `StagingDir::object_path`. The directory is
    /// removed on drop unless it gets published by `put`.
    pub fn staging(&self) -> DepcacheResult<StagingDir> {
        let path = self.root.join(TMP_DIR).join(Uuid::new_v4().to_string());
        fs::create_dir_all(&path).map_err(|e| DepcacheError::cache_unavailable(&path, e))?;
        Ok(StagingDir { path, armed: true })
    }

    /// Publish a staged entry under its fingerprint
    ///
    /// If another writer already published the same fingerprint, the staged
    /// copy is discarded and the existing entry is returned.
    pub fn put(&self, mut staging: StagingDir, metadata: &EntryMetadata) -> DepcacheResult<CacheEntry> {
        let fingerprint = &metadata.fingerprint;
        let metadata_path = staging.path.join(METADATA_FILE);
        write_synced(&metadata_path, &serde_json::to_vec_pretty(metadata)?)
            .map_err(|e| DepcacheError::cache_unavailable(&metadata_path, e))?;

        let dest = self.entry_dir(fingerprint);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| DepcacheError::cache_unavailable(parent, e))?;
        }

        match fs::rename(&staging.path, &dest) {
            Ok(()) => {
                staging.armed = false;
                if let Some(parent) = dest.parent() {
                    sync_dir_best_effort(parent);
                }
                debug!(fingerprint = %fingerprint.short(), "Published cache entry");
                Ok(CacheEntry {
                    metadata: metadata.clone(),
                    dir: dest,
                    last_used: None,
                })
            }
            Err(e) if dest.join(METADATA_FILE).exists() => {
                debug!(
                    fingerprint = %fingerprint.short(),
                    error = %e,
                    "Entry already published by another writer"
                );
                drop(staging);
                self.get(fingerprint)?.ok_or_else(|| {
                    DepcacheError::cache_unavailable(&dest, "entry vanished after publish race")
                })
            }
            Err(e) => Err(DepcacheError::cache_unavailable(&dest, e)),
        }
    }

    /// Record that an entry served a fetch (best effort, used by LRU eviction)
    pub fn touch(&self, fingerprint: &Fingerprint) {
        let path = self.entry_dir(fingerprint).join(LAST_USED_FILE);
        if let Err(e) = atomic_write(&path, Utc::now().to_rfc3339().as_bytes()) {
            debug!(path = %path.display(), error = %e, "Failed to update last-used marker");
        }
    }

    /// Move an entry out of the lookup path
    ///
    /// Returns the quarantine location, or `None` if the entry was already gone.
    pub fn quarantine(&self, fingerprint: &Fingerprint) -> DepcacheResult<Option<PathBuf>> {
        let source = self.entry_dir(fingerprint);
        let dest = self
            .root
            .join(QUARANTINE_DIR)
            .join(format!("{}.{}", fingerprint.as_str(), Uuid::new_v4()));

        match fs::rename(&source, &dest) {
            Ok(()) => {
                warn!(
                    fingerprint = %fingerprint.short(),
                    dest = %dest.display(),
                    "Quarantined cache entry"
                );
                Ok(Some(dest))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DepcacheError::cache_unavailable(&source, e)),
        }
    }

    /// Delete an entry (maintenance only, never called while fetching)
    pub fn remove(&self, fingerprint: &Fingerprint) -> DepcacheResult<bool> {
        let source = self.entry_dir(fingerprint);
        let doomed = self.root.join(TMP_DIR).join(format!("evict-{}", Uuid::new_v4()));

        match fs::rename(&source, &doomed) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(DepcacheError::io(format!("evicting {}", source.display()), e)),
        }

        fs::remove_dir_all(&doomed)
            .map_err(|e| DepcacheError::io(format!("removing {}", doomed.display()), e))?;
        Ok(true)
    }

    /// All published entries; unreadable ones are skipped
    pub fn list(&self) -> DepcacheResult<Vec<CacheEntry>> {
        let mut entries = Vec::new();

        for shard in read_dir_paths(&self.root.join(ENTRIES_DIR))? {
            if !shard.is_dir() {
                continue;
            }
            for dir in read_dir_paths(&shard)? {
                let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let Ok(fingerprint) = Fingerprint::parse(name) else {
                    debug!(path = %dir.display(), "Skipping foreign directory in cache");
                    continue;
                };
                match self.get(&fingerprint) {
                    Ok(Some(entry)) => entries.push(entry),
                    Ok(None) => {}
                    Err(e) => debug!(path = %dir.display(), error = %e, "Skipping unreadable entry"),
                }
            }
        }

        entries.sort_by(|a, b| a.metadata.created_at.cmp(&b.metadata.created_at));
        Ok(entries)
    }

    /// Quarantined entry directories
    pub fn quarantined(&self) -> DepcacheResult<Vec<PathBuf>> {
        read_dir_paths(&self.root.join(QUARANTINE_DIR))
    }

    /// Staging directories not modified for `max_age` (left by aborted runs)
    pub fn stale_staging(&self, max_age: Duration) -> DepcacheResult<Vec<PathBuf>> {
        let now = SystemTime::now();
        let stale = read_dir_paths(&self.root.join(TMP_DIR))?
            .into_iter()
            .filter(|path| {
                fs::metadata(path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| now.duration_since(modified).ok())
                    .is_some_and(|age| age >= max_age)
            })
            .collect();
        Ok(stale)
    }

    /// Entry count and size
    pub fn stats(&self) -> DepcacheResult<StoreStats> {
        let entries = self.list()?;
        Ok(StoreStats {
            entries: entries.len(),
            total_bytes: entries.iter().map(|e| e.metadata.size_bytes).sum(),
            quarantined: self.quarantined()?.len(),
        })
    }
}

/// Unpublished entry directory under `<root>/tmp`
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
    armed: bool,
}

impl StagingDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where a backend should write the fetched blob
    pub fn object_path(&self) -> PathBuf {
        self.path.join(OBJECT_FILE)
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(path = %self.path.display(), error = %e, "Failed to remove staging dir");
                }
            }
        }
    }
}

fn read_dir_paths(dir: &Path) -> DepcacheResult<Vec<PathBuf>> {
    let iter = match fs::read_dir(dir) {
        Ok(iter) => iter,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(DepcacheError::io(format!("reading {}", dir.display()), e)),
    };

    let mut paths = Vec::new();
    for entry in iter {
        let entry = entry.map_err(|e| DepcacheError::io(format!("reading {}", dir.display()), e))?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Write a file through a unique temporary sibling and rename it into place
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::other("path has no parent"))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::other("path has no file name"))?;

    let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(format!(".tmp.{}.{}", std::process::id(), counter));
    let tmp_path = parent.join(tmp_name);

    if let Err(e) = write_synced(&tmp_path, bytes) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fs::rename(&tmp_path, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp_path);
    })
}

fn sync_dir_best_effort(dir: &Path) {
    #[cfg(unix)]
    if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
        trace!(dir = %dir.display(), error = %e, "Failed to sync directory");
    }

    #[cfg(not(unix))]
    let _ = dir;
}
