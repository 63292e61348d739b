//! Omnicache: a shared bare repository used as a git object cache
//!
//! The root is an ordinary bare repository so any git client can use it as
//! a reference. Cache entries for resolved commits live in an entry store
//! under `<root>/depcache`, and every entry pins its commit with a ref under
//! `refs/depcache/pins/` so repository maintenance never prunes it.

use crate::backend::git::{hold_age, HOLD_REF_PREFIX, PIN_REF_PREFIX};
use crate::backend::GitCli;
use crate::cache::entry::{CacheEntry, EntryMetadata, Integrity};
use crate::cache::fingerprint::Fingerprint;
use crate::cache::store::CacheStore;
use crate::error::{DepcacheError, DepcacheResult};
use crate::identifier::ArtifactIdentifier;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Entry store directory inside the bare repository
const ENTRY_STORE_DIR: &str = "depcache";

/// Shared git object cache
#[derive(Debug, Clone)]
pub struct Omnicache {
    root: PathBuf,
    store: CacheStore,
    git: GitCli,
}

impl Omnicache {
    /// Open the Omnicache at `root`, creating the bare repository if needed
    ///
    /// Any failure is `CacheUnavailable`.
    pub async fn open(root: impl Into<PathBuf>, git: GitCli) -> DepcacheResult<Self> {
        let root = root.into();

        if !root.join("HEAD").is_file() {
            info!("Initializing Omnicache at {}", root.display());
            tokio::fs::create_dir_all(&root)
                .await
                .map_err(|e| DepcacheError::cache_unavailable(&root, e))?;
            git.init_bare(&root)
                .await
                .map_err(|e| DepcacheError::cache_unavailable(&root, e))?;
        } else {
            git.ensure_config(&root, "uploadpack.allowAnySHA1InWant", "true")
                .await
                .map_err(|e| DepcacheError::cache_unavailable(&root, e))?;
        }

        let store = CacheStore::open(root.join(ENTRY_STORE_DIR))?;
        Ok(Self { root, store, git })
    }

    /// The bare repository
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Entry store for resolved commits
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Ref that keeps an entry's commit reachable
    pub fn pin_ref(fingerprint: &Fingerprint) -> String {
        format!("{}{}", PIN_REF_PREFIX, fingerprint.as_str())
    }

    /// Record `commit` as the content of `fingerprint`
    ///
    /// The commit must already be present. The pin is written before the
    /// entry is published, so a published entry always has its pin. The
    /// entry size is the on-disk size of every object the commit reaches;
    /// objects shared between commits count once per entry.
    pub async fn publish(
        &self,
        fingerprint: &Fingerprint,
        identifier: &ArtifactIdentifier,
        commit: &str,
    ) -> DepcacheResult<CacheEntry> {
        let tree = self
            .git
            .tree_of(&self.root, commit)
            .await
            .map_err(|e| DepcacheError::cache_unavailable(&self.root, e))?
            .ok_or_else(|| {
                DepcacheError::cache_unavailable(
                    &self.root,
                    format!("commit {} missing after fetch", commit),
                )
            })?;

        self.git
            .update_ref(&self.root, &Self::pin_ref(fingerprint), commit)
            .await
            .map_err(|e| DepcacheError::cache_unavailable(&self.root, e))?;

        let size = match self.git.disk_usage(&self.root, commit).await {
            Some(size) => size,
            None => {
                debug!(commit, "Disk usage unavailable, recording size 0");
                0
            }
        };

        let metadata = EntryMetadata::new(
            fingerprint.clone(),
            identifier.clone(),
            Integrity::Commit {
                commit: commit.to_string(),
                tree,
            },
            size,
        );
        let staging = self.store.staging()?;
        self.store.put(staging, &metadata)
    }

    /// Drop an entry and its pin
    pub async fn evict(&self, fingerprint: &Fingerprint) -> DepcacheResult<bool> {
        let removed = self.store.remove(fingerprint)?;
        self.git
            .delete_ref(&self.root, &Self::pin_ref(fingerprint))
            .await?;
        Ok(removed)
    }

    /// Delete pins whose entries no longer exist (left by evicted or
    /// quarantined entries); returns how many were removed
    pub async fn prune_pins(&self) -> DepcacheResult<usize> {
        let mut pruned = 0;
        for (name, _) in self.git.list_refs(&self.root, PIN_REF_PREFIX).await? {
            let Some(hex) = name.strip_prefix(PIN_REF_PREFIX) else {
                continue;
            };
            let orphaned = match Fingerprint::parse(hex) {
                Ok(fp) => !self.store.entry_dir(&fp).exists(),
                Err(_) => true,
            };
            if orphaned {
                debug!(pin = %name, "Removing orphaned pin");
                self.git.delete_ref(&self.root, &name).await?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    /// Delete hold refs older than `max_age`, left by fetches that never
    /// finished; returns how many were removed
    pub async fn release_stale_holds(&self, max_age: Duration) -> DepcacheResult<usize> {
        let mut released = 0;
        for (name, _) in self.git.list_refs(&self.root, HOLD_REF_PREFIX).await? {
            if !matches!(hold_age(&name), Some(age) if age < max_age) {
                debug!(hold = %name, "Removing stale hold");
                self.git.delete_ref(&self.root, &name).await?;
                released += 1;
            }
        }
        Ok(released)
    }

    /// Repack and prune objects no ref has reached for `grace`
    pub async fn compact(&self, grace: Duration) -> DepcacheResult<()> {
        info!("Running git gc on {}", self.root.display());
        self.git.gc(&self.root, grace).await
    }
}
