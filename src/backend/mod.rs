//! Fetch backends
//!
//! The set of remote kinds is closed, so backends are chosen by matching on
//! the identifier rather than through a trait object. Only the HTTP
//! transport underneath is pluggable.

pub mod git;
pub mod http;
pub mod nuget;

pub use git::{GitCli, Granularity, ResolvedRef};
pub use http::{HttpTransport, UreqTransport};
pub use nuget::NugetBackend;

use crate::cache::guard::digest_file;
use crate::error::{DepcacheError, DepcacheResult};
use crate::identifier::{ArtifactIdentifier, GitSpec};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Result of a raw remote fetch, before materialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawObject {
    /// A downloaded file and its digest
    Blob {
        path: PathBuf,
        size: u64,
        sha256: String,
    },
    /// A commit present in a local bare repository
    Commit { repo: PathBuf, commit: String },
}

/// Where a raw fetch lands
#[derive(Debug, Clone, Copy)]
pub enum FetchTarget<'a> {
    /// Write the downloaded object to this file
    File(&'a Path),
    /// Fetch objects into this bare repository
    Repository {
        path: &'a Path,
        granularity: Granularity,
    },
}

/// All remote backends
#[derive(Clone)]
pub struct Backends {
    pub git: GitCli,
    pub nuget: NugetBackend,
    http: Arc<dyn HttpTransport>,
}

impl Backends {
    /// Backends over a given HTTP transport and the `git` on PATH
    pub fn new(http: Arc<dyn HttpTransport>) -> Self {
        Self::with_git(GitCli::new(), http)
    }

    pub fn with_git(git: GitCli, http: Arc<dyn HttpTransport>) -> Self {
        Self {
            git,
            nuget: NugetBackend::new(http.clone()),
            http,
        }
    }

    /// Fetch the object an identifier names into `target`
    ///
    /// Downloads are checked against a declared `sha256`; a mismatch is an
    /// `IntegrityError`.
    pub async fn fetch_remote(
        &self,
        id: &ArtifactIdentifier,
        target: FetchTarget<'_>,
    ) -> DepcacheResult<RawObject> {
        match (id, target) {
            (ArtifactIdentifier::Git(spec), FetchTarget::Repository { path, granularity }) => {
                let resolved = self.git.resolve(spec).await?;
                let commit = self
                    .fetch_commit(spec, &resolved, path, granularity, &git::hold_ref())
                    .await?;
                Ok(RawObject::Commit {
                    repo: path.to_path_buf(),
                    commit,
                })
            }
            (ArtifactIdentifier::Nuget(spec), FetchTarget::File(path)) => {
                self.nuget.download(spec, path).await?;
                finish_blob(id, path).await
            }
            (ArtifactIdentifier::Web(spec), FetchTarget::File(path)) => {
                self.http.download(&spec.url, path).await?;
                finish_blob(id, path).await
            }
            (id, target) => Err(DepcacheError::Internal(format!(
                "cannot fetch {} into {:?}",
                id, target
            ))),
        }
    }

    /// Make `resolved` available in the bare repository `repo`, reachable
    /// from the ref `hold`
    ///
    /// Skips the network when the commit is already present and can be
    /// held. Returns the commit that ended up fetched.
    pub async fn fetch_commit(
        &self,
        spec: &GitSpec,
        resolved: &ResolvedRef,
        repo: &Path,
        granularity: Granularity,
        hold: &str,
    ) -> DepcacheResult<String> {
        if self.git.has_commit(repo, &resolved.commit).await
            && self.git.update_ref(repo, hold, &resolved.commit).await.is_ok()
        {
            debug!(commit = %resolved.commit, "Commit already present, skipping fetch");
            return Ok(resolved.commit.clone());
        }
        self.git
            .fetch_into(repo, &spec.url, resolved, granularity, hold)
            .await
    }
}

async fn finish_blob(id: &ArtifactIdentifier, path: &Path) -> DepcacheResult<RawObject> {
    let (size, sha256) = digest_file(path).await?;

    if let Some(expected) = id.declared_sha256() {
        if !expected.eq_ignore_ascii_case(&sha256) {
            return Err(DepcacheError::IntegrityError {
                subject: id.to_string(),
                reason: format!("downloaded sha256 {} does not match declared {}", sha256, expected),
            });
        }
    }

    Ok(RawObject::Blob {
        path: path.to_path_buf(),
        size,
        sha256,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::http::tests::FakeTransport;
    use crate::identifier::{ArchiveKind, WebSpec};
    use sha2::{Digest, Sha256};
    use tempfile::TempDir;

    fn web(sha256: Option<String>) -> ArtifactIdentifier {
        ArtifactIdentifier::Web(WebSpec {
            url: "https://example.org/tool.bin".to_string(),
            name: "tool".to_string(),
            version: "1.0".to_string(),
            sha256,
            archive: ArchiveKind::None,
            internal_path: None,
        })
    }

    #[tokio::test]
    async fn web_fetch_reports_digest() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeTransport::default());
        fake.serve("https://example.org/tool.bin", b"tool".to_vec());
        let backends = Backends::new(fake);

        let dest = temp.path().join("object");
        let raw = backends
            .fetch_remote(&web(None), FetchTarget::File(&dest))
            .await
            .unwrap();

        let expected = hex::encode(Sha256::digest(b"tool"));
        assert_eq!(
            raw,
            RawObject::Blob {
                path: dest,
                size: 4,
                sha256: expected
            }
        );
    }

    #[tokio::test]
    async fn declared_hash_mismatch_is_integrity_error() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeTransport::default());
        fake.serve("https://example.org/tool.bin", b"tampered".to_vec());
        let backends = Backends::new(fake);

        let err = backends
            .fetch_remote(&web(Some("0".repeat(64))), FetchTarget::File(&temp.path().join("o")))
            .await
            .unwrap_err();
        assert!(matches!(err, DepcacheError::IntegrityError { .. }));
    }

    #[tokio::test]
    async fn remote_errors_pass_through() {
        let temp = TempDir::new().unwrap();
        let fake = Arc::new(FakeTransport::default());
        fake.fail("https://example.org/tool.bin", 403);
        let backends = Backends::new(fake);

        let err = backends
            .fetch_remote(&web(None), FetchTarget::File(&temp.path().join("o")))
            .await
            .unwrap_err();
        assert!(matches!(err, DepcacheError::AuthError { .. }));
    }

    #[tokio::test]
    async fn mismatched_target_is_rejected() {
        let temp = TempDir::new().unwrap();
        let backends = Backends::new(Arc::new(FakeTransport::default()));
        let id = ArtifactIdentifier::git("https://example.org/repo.git", "main");
        let err = backends
            .fetch_remote(&id, FetchTarget::File(temp.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, DepcacheError::Internal(_)));
    }
}
