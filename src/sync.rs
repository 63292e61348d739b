//! Descriptor sync
//!
//! Materializes every discovered `*_ext_dep.json` into its `<name>_extdep`
//! directory and records what was placed there in `extdep_state.json`.

use crate::cache::store::atomic_write;
use crate::descriptor::ExtDepDescriptor;
use crate::error::{DepcacheError, DepcacheResult};
use crate::fetcher::CachedFetcher;
use crate::identifier::ArtifactIdentifier;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// State file written inside each output directory
pub const STATE_FILE: &str = "extdep_state.json";

/// What a previous sync placed in an output directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtDepState {
    pub identifier: ArtifactIdentifier,
    pub digest: String,
}

impl ExtDepState {
    /// Read the state of an output directory, if any
    pub fn read(dir: &Path) -> Option<Self> {
        let raw = fs::read(dir.join(STATE_FILE)).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    fn write(&self, dir: &Path) -> DepcacheResult<()> {
        let path = dir.join(STATE_FILE);
        atomic_write(&path, &serde_json::to_vec_pretty(self)?)
            .map_err(|e| DepcacheError::io(format!("writing {}", path.display()), e))
    }
}

/// Result for one descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Updated,
    UpToDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub name: String,
    pub descriptor: PathBuf,
    pub dest: PathBuf,
    pub digest: String,
    pub status: SyncStatus,
}

/// Bring one descriptor's output directory up to date
pub async fn sync_descriptor(
    fetcher: &CachedFetcher,
    descriptor: &ExtDepDescriptor,
    force: bool,
) -> DepcacheResult<SyncOutcome> {
    let identifier = descriptor.identifier()?;
    let dest = descriptor.output_dir();

    if !force {
        if let Some(state) = ExtDepState::read(&dest).filter(|s| s.identifier == identifier) {
            debug!(name = %descriptor.name, "Already up to date");
            return Ok(SyncOutcome {
                name: descriptor.name.clone(),
                descriptor: descriptor.path.clone(),
                dest,
                digest: state.digest,
                status: SyncStatus::UpToDate,
            });
        }
    }

    let artifact = fetcher.fetch(&identifier, &dest).await?;
    ExtDepState {
        identifier,
        digest: artifact.digest.clone(),
    }
    .write(&dest)?;

    info!(name = %descriptor.name, dest = %dest.display(), "Updated external dependency");
    Ok(SyncOutcome {
        name: descriptor.name.clone(),
        descriptor: descriptor.path.clone(),
        dest,
        digest: artifact.digest,
        status: SyncStatus::Updated,
    })
}

/// Sync many descriptors with up to `jobs` fetches in flight
///
/// Results come back in descriptor order; one failure does not stop the rest.
/// `on_done` runs as each descriptor finishes, in completion order.
pub async fn sync_all<F>(
    fetcher: &CachedFetcher,
    descriptors: &[ExtDepDescriptor],
    jobs: usize,
    force: bool,
    on_done: F,
) -> Vec<DepcacheResult<SyncOutcome>>
where
    F: Fn(&ExtDepDescriptor, &DepcacheResult<SyncOutcome>),
{
    let on_done = &on_done;
    stream::iter(descriptors)
        .map(|descriptor| async move {
            let result = sync_descriptor(fetcher, descriptor, force).await;
            on_done(descriptor, &result);
            result
        })
        .buffered(jobs.max(1))
        .collect()
        .await
}
