//! Equivalence guard
//!
//! Nothing from the cache is materialized until it has been checked against
//! the integrity record written when the entry was published.

use crate::backend::GitCli;
use crate::cache::entry::{CacheEntry, Integrity, ENTRY_FORMAT};
use crate::error::{DepcacheError, DepcacheResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

/// Outcome of verifying an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid(String),
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => f.write_str("valid"),
            Self::Invalid(reason) => write!(f, "invalid: {}", reason),
        }
    }
}

/// How thoroughly Omnicache commits are checked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VerifyDepth {
    /// Commit present and its root tree matches
    #[default]
    #[serde(alias = "tree")]
    #[value(alias = "tree")]
    Quick,
    /// Additionally walk every reachable object
    Full,
}

/// Checks cache entries before they are trusted
#[derive(Debug, Clone)]
pub struct EquivalenceGuard {
    git: GitCli,
    depth: VerifyDepth,
}

impl EquivalenceGuard {
    pub fn new(git: GitCli, depth: VerifyDepth) -> Self {
        Self { git, depth }
    }

    /// Verify an entry; `repository` is the Omnicache for commit entries
    pub async fn verify(&self, entry: &CacheEntry, repository: Option<&Path>) -> Verdict {
        if entry.metadata.format != ENTRY_FORMAT {
            return Verdict::Invalid(format!(
                "unsupported entry format {}",
                entry.metadata.format
            ));
        }

        let verdict = match &entry.metadata.integrity {
            Integrity::Blob { sha256 } => self.verify_blob(entry, sha256).await,
            Integrity::Commit { commit, tree } => match repository {
                Some(repo) => self.verify_commit(repo, commit, tree).await,
                None => Verdict::Invalid("commit entry outside a repository".to_string()),
            },
        };

        debug!(
            fingerprint = %entry.fingerprint().short(),
            verdict = %verdict,
            "Verified cache entry"
        );
        verdict
    }

    async fn verify_blob(&self, entry: &CacheEntry, recorded: &str) -> Verdict {
        if let Some(declared) = entry.metadata.identifier.declared_sha256() {
            if !declared.eq_ignore_ascii_case(recorded) {
                return Verdict::Invalid(format!(
                    "recorded sha256 {} differs from declared {}",
                    recorded, declared
                ));
            }
        }

        let path = entry.object_path();
        match fs::metadata(&path) {
            Ok(meta) if meta.len() != entry.metadata.size_bytes => {
                return Verdict::Invalid(format!(
                    "object is {} bytes, expected {}",
                    meta.len(),
                    entry.metadata.size_bytes
                ));
            }
            Ok(_) => {}
            Err(e) => return Verdict::Invalid(format!("object unreadable: {}", e)),
        }

        match digest_file(&path).await {
            Ok((_, actual)) if actual.eq_ignore_ascii_case(recorded) => Verdict::Valid,
            Ok((_, actual)) => Verdict::Invalid(format!(
                "object sha256 {} does not match recorded {}",
                actual, recorded
            )),
            Err(e) => Verdict::Invalid(format!("object unreadable: {}", e)),
        }
    }

    async fn verify_commit(&self, repo: &Path, commit: &str, tree: &str) -> Verdict {
        match self.git.tree_of(repo, commit).await {
            Ok(Some(actual)) if actual.eq_ignore_ascii_case(tree) => {}
            Ok(Some(actual)) => {
                return Verdict::Invalid(format!(
                    "commit {} has tree {}, recorded {}",
                    commit, actual, tree
                ))
            }
            Ok(None) => return Verdict::Invalid(format!("commit {} is missing", commit)),
            Err(e) => return Verdict::Invalid(e.to_string()),
        }

        if self.depth == VerifyDepth::Full && !self.git.is_complete(repo, commit).await {
            return Verdict::Invalid(format!("objects reachable from {} are missing", commit));
        }

        Verdict::Valid
    }
}

/// Size and SHA-256 of a file, computed on the blocking pool
pub async fn digest_file(path: &Path) -> DepcacheResult<(u64, String)> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || digest_file_blocking(&owned))
        .await
        .map_err(|e| DepcacheError::Internal(format!("hash task failed: {}", e)))?
        .map_err(|e| DepcacheError::io(format!("hashing {}", path.display()), e))
}

/// Size and SHA-256 of a file
pub fn digest_file_blocking(path: &Path) -> io::Result<(u64, String)> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok((size, hex::encode(hasher.finalize())))
}
