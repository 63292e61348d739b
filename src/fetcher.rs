//! Cache-aware fetcher
//!
//! `CachedFetcher::fetch` is the one operation callers use. It looks the
//! identifier up in the relevant cache, verifies any hit, and otherwise
//! fetches from the remote and publishes a new entry. With no cache root
//! configured it takes the bypass path, which shares the backend and the
//! materializer with the cached path so the output is the same.
//!
//! Cache-layer failures never fail a fetch: the fetcher logs them and falls
//! back to the bypass path, or skips publishing.

use crate::backend::git::hold_ref;
use crate::backend::{Backends, FetchTarget, Granularity, RawObject};
use crate::cache::{
    CacheStore, EntryMetadata, EquivalenceGuard, Fingerprint, Fingerprinter, Integrity,
    Omnicache, Sha256Fingerprinter, Verdict, VerifyDepth,
};
use crate::error::{DepcacheError, DepcacheResult};
use crate::identifier::{ArtifactIdentifier, GitSpec};
use crate::materialize::{MaterializedArtifact, Materializer, Provenance};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Cache configuration for one run
///
/// Read once at startup and passed in; nothing below this reads the
/// environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSettings {
    /// Omnicache root (bare repository); `None` disables it
    pub omnicache: Option<PathBuf>,
    /// Extdep cache root; `None` disables it
    pub extdep: Option<PathBuf>,
    pub granularity: Granularity,
    pub verify: VerifyDepth,
}

impl CacheSettings {
    /// Both caches off
    pub fn disabled() -> Self {
        Self::default()
    }
}

/// Fetches artifacts through the configured caches
pub struct CachedFetcher {
    settings: CacheSettings,
    backends: Backends,
    fingerprinter: Arc<dyn Fingerprinter>,
    materializer: Materializer,
    guard: EquivalenceGuard,
    omnicache: OnceCell<Option<Omnicache>>,
    extdep: OnceCell<Option<CacheStore>>,
}

impl CachedFetcher {
    pub fn new(settings: CacheSettings, backends: Backends) -> Self {
        let git = backends.git.clone();
        Self {
            guard: EquivalenceGuard::new(git.clone(), settings.verify),
            materializer: Materializer::new(git),
            fingerprinter: Arc::new(Sha256Fingerprinter),
            omnicache: OnceCell::new(),
            extdep: OnceCell::new(),
            settings,
            backends,
        }
    }

    /// Use a different fingerprint scheme
    pub fn with_fingerprinter(mut self, fingerprinter: Arc<dyn Fingerprinter>) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Fetch `id` and materialize it at `dest`, replacing anything there
    pub async fn fetch(&self, id: &ArtifactIdentifier, dest: &Path) -> DepcacheResult<MaterializedArtifact> {
        id.validate()?;

        let artifact = match id {
            ArtifactIdentifier::Git(spec) => self.fetch_git(id, spec, dest).await?,
            _ => self.fetch_blob(id, dest).await?,
        };

        info!(
            provenance = %artifact.provenance,
            digest = %artifact.digest,
            "Fetched {}",
            id
        );
        Ok(artifact)
    }

    async fn omnicache(&self) -> Option<&Omnicache> {
        self.omnicache
            .get_or_init(|| async {
                let root = self.settings.omnicache.as_ref()?;
                match Omnicache::open(root, self.backends.git.clone()).await {
                    Ok(omnicache) => Some(omnicache),
                    Err(e) => {
                        warn!("Omnicache disabled for this run: {}", e);
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    async fn extdep_store(&self) -> Option<&CacheStore> {
        self.extdep
            .get_or_init(|| async {
                let root = self.settings.extdep.as_ref()?;
                match CacheStore::open(root) {
                    Ok(store) => Some(store),
                    Err(e) => {
                        warn!("Extdep cache disabled for this run: {}", e);
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    async fn fetch_blob(&self, id: &ArtifactIdentifier, dest: &Path) -> DepcacheResult<MaterializedArtifact> {
        let Some(store) = self.extdep_store().await else {
            return self.bypass_blob(id, dest).await;
        };

        match self.cached_blob(store, id, dest).await {
            Err(e) if e.is_cache_layer() => {
                warn!("Extdep cache failed, fetching directly: {}", e);
                self.bypass_blob(id, dest).await
            }
            other => other,
        }
    }

    async fn cached_blob(
        &self,
        store: &CacheStore,
        id: &ArtifactIdentifier,
        dest: &Path,
    ) -> DepcacheResult<MaterializedArtifact> {
        let fingerprint = self.fingerprinter.fingerprint(id, None);

        let rejected = match self.lookup(store, &fingerprint, None).await? {
            Lookup::Hit(entry) => {
                debug!(fingerprint = %fingerprint.short(), "Serving {} from cache", id);
                let raw = RawObject::Blob {
                    path: entry.object_path(),
                    size: entry.metadata.size_bytes,
                    sha256: entry.metadata.integrity.digest().to_string(),
                };
                store.touch(&fingerprint);
                return self
                    .materializer
                    .materialize(id, &raw, dest, Provenance::CacheHit)
                    .await;
            }
            Lookup::Miss => None,
            Lookup::Rejected(reason) => Some(reason),
        };

        let staging = store.staging()?;
        let object_path = staging.object_path();
        let raw = match self
            .backends
            .fetch_remote(id, FetchTarget::File(&object_path))
            .await
        {
            Ok(raw) => raw,
            Err(e) if e.is_remote() || matches!(e, DepcacheError::IntegrityError { .. }) => {
                return Err(refetch_failed(id, rejected.as_deref(), e))
            }
            // Writing into the staging directory failed
            Err(e) => return Err(DepcacheError::cache_unavailable(store.root(), e)),
        };

        let artifact = self
            .materializer
            .materialize(id, &raw, dest, Provenance::CacheMiss)
            .await?;

        if let RawObject::Blob { size, sha256, .. } = raw {
            let metadata = EntryMetadata::new(
                fingerprint,
                id.clone(),
                Integrity::Blob { sha256 },
                size,
            );
            if let Err(e) = store.put(staging, &metadata) {
                warn!("Failed to publish cache entry for {}: {}", id, e);
            }
        }

        Ok(artifact)
    }

    async fn bypass_blob(&self, id: &ArtifactIdentifier, dest: &Path) -> DepcacheResult<MaterializedArtifact> {
        let scratch = scratch_dir()?;
        let object_path = scratch.path().join("object");
        let raw = self
            .backends
            .fetch_remote(id, FetchTarget::File(&object_path))
            .await?;
        self.materializer
            .materialize(id, &raw, dest, Provenance::Bypass)
            .await
    }

    async fn fetch_git(
        &self,
        id: &ArtifactIdentifier,
        spec: &GitSpec,
        dest: &Path,
    ) -> DepcacheResult<MaterializedArtifact> {
        let Some(omnicache) = self.omnicache().await else {
            return self.bypass_git(id, dest).await;
        };

        let hold = hold_ref();
        let result = self.cached_git(omnicache, id, spec, dest, &hold).await;
        if let Err(e) = self.backends.git.delete_ref(omnicache.root(), &hold).await {
            debug!("Failed to release {}: {}", hold, e);
        }

        match result {
            Err(e) if e.is_cache_layer() => {
                warn!("Omnicache failed, fetching directly: {}", e);
                self.bypass_git(id, dest).await
            }
            other => other,
        }
    }

    /// Serve a git identifier through the Omnicache
    ///
    /// Whatever commit is being materialized stays reachable from `hold`
    /// so a concurrent `gc` cannot prune it.
    async fn cached_git(
        &self,
        omnicache: &Omnicache,
        id: &ArtifactIdentifier,
        spec: &GitSpec,
        dest: &Path,
        hold: &str,
    ) -> DepcacheResult<MaterializedArtifact> {
        let resolved = self.backends.git.resolve(spec).await?;
        let mut fingerprint = self.fingerprinter.fingerprint(id, Some(&resolved.commit));
        let store = omnicache.store();
        let repo = omnicache.root();

        let rejected = match self.lookup(store, &fingerprint, Some(repo)).await? {
            Lookup::Hit(entry) => {
                debug!(fingerprint = %fingerprint.short(), "Serving {} from Omnicache", id);
                store.touch(&fingerprint);
                let commit = entry.metadata.integrity.digest();
                let served = match self.backends.git.update_ref(repo, hold, commit).await {
                    Ok(()) => self.checkout(repo, commit, id, dest, Provenance::CacheHit).await,
                    Err(e) => Err(e),
                };
                return match served {
                    Ok(artifact) => Ok(artifact),
                    // Verification reads commits and trees only; a damaged
                    // blob shows up here, and the shared store cannot be
                    // trusted to repair itself
                    Err(e) => {
                        warn!(
                            fingerprint = %fingerprint.short(),
                            "Omnicache could not materialize {}, fetching directly: {}",
                            id,
                            e
                        );
                        if let Err(q) = store.quarantine(&fingerprint) {
                            warn!("Failed to quarantine {}: {}", fingerprint.short(), q);
                        }
                        let reason = e.to_string();
                        self.bypass_git(id, dest)
                            .await
                            .map_err(|e| refetch_failed(id, Some(&reason), e))
                    }
                };
            }
            Lookup::Miss => None,
            Lookup::Rejected(reason) => Some(reason),
        };

        // A rejected entry may point at damaged objects, so go to the remote
        let fetched = if rejected.is_some() {
            self.backends
                .git
                .fetch_into(repo, &spec.url, &resolved, self.settings.granularity, hold)
                .await
        } else {
            self.backends
                .fetch_commit(spec, &resolved, repo, self.settings.granularity, hold)
                .await
        };
        let commit = match fetched {
            Ok(commit) => commit,
            Err(e) if e.is_remote() => return Err(refetch_failed(id, rejected.as_deref(), e)),
            Err(e) => return Err(DepcacheError::cache_unavailable(repo, e)),
        };

        // Only a commit that checked out cleanly is published
        let artifact = self
            .checkout(repo, &commit, id, dest, Provenance::CacheMiss)
            .await
            .map_err(|e| DepcacheError::cache_unavailable(repo, e))?;

        if commit != resolved.commit {
            fingerprint = self.fingerprinter.fingerprint(id, Some(&commit));
        }
        if let Err(e) = omnicache.publish(&fingerprint, id, &commit).await {
            warn!("Failed to publish Omnicache entry for {}: {}", id, e);
        }
        Ok(artifact)
    }

    async fn checkout(
        &self,
        repo: &Path,
        commit: &str,
        id: &ArtifactIdentifier,
        dest: &Path,
        provenance: Provenance,
    ) -> DepcacheResult<MaterializedArtifact> {
        let raw = RawObject::Commit {
            repo: repo.to_path_buf(),
            commit: commit.to_string(),
        };
        self.materializer.materialize(id, &raw, dest, provenance).await
    }

    async fn bypass_git(&self, id: &ArtifactIdentifier, dest: &Path) -> DepcacheResult<MaterializedArtifact> {
        let scratch = scratch_dir()?;
        let repo = scratch.path().join("objects.git");
        self.backends.git.init_bare(&repo).await?;

        let raw = self
            .backends
            .fetch_remote(
                id,
                FetchTarget::Repository {
                    path: &repo,
                    granularity: Granularity::Revision,
                },
            )
            .await?;
        self.materializer
            .materialize(id, &raw, dest, Provenance::Bypass)
            .await
    }

    /// Look up and verify an entry; invalid entries are quarantined
    async fn lookup(
        &self,
        store: &CacheStore,
        fingerprint: &Fingerprint,
        repository: Option<&Path>,
    ) -> DepcacheResult<Lookup> {
        let reason = match store.get(fingerprint) {
            Ok(None) => return Ok(Lookup::Miss),
            Ok(Some(entry)) => match self.guard.verify(&entry, repository).await {
                Verdict::Valid => return Ok(Lookup::Hit(entry)),
                Verdict::Invalid(reason) => reason,
            },
            Err(e @ DepcacheError::CacheEntryMalformed { .. }) => e.to_string(),
            Err(e) => return Err(e),
        };

        warn!(
            fingerprint = %fingerprint.short(),
            "Cache entry failed verification, refetching: {}",
            reason
        );
        store.quarantine(fingerprint)?;
        Ok(Lookup::Rejected(reason))
    }
}

enum Lookup {
    Hit(crate::cache::CacheEntry),
    Miss,
    /// An entry existed but failed verification and was quarantined
    Rejected(String),
}

/// Error for a failed remote fetch; after a rejected entry it is an
/// integrity failure, otherwise the remote error unchanged
fn refetch_failed(id: &ArtifactIdentifier, rejected: Option<&str>, error: DepcacheError) -> DepcacheError {
    match rejected {
        Some(reason) if error.is_remote() => DepcacheError::IntegrityError {
            subject: id.to_string(),
            reason: format!(
                "cache entry rejected ({}) and refetch failed: {}",
                reason, error
            ),
        },
        _ => error,
    }
}

fn scratch_dir() -> DepcacheResult<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix("depcache-")
        .tempdir()
        .map_err(|e| DepcacheError::io("creating scratch directory", e))
}
