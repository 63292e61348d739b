//! Git backend
//!
//! Drives the `git` executable. Remote operations (`ls-remote`, `fetch`)
//! classify failures into the remote error taxonomy; local operations on a
//! repository this process owns report plain command errors.

use crate::error::{DepcacheError, DepcacheResult};
use crate::identifier::{is_full_commit_id, GitSpec};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, trace};
use uuid::Uuid;

/// Namespace for commits pinned by cache entries
pub const PIN_REF_PREFIX: &str = "refs/depcache/pins/";

/// Namespace for refs that keep a commit reachable while a fetch is in flight
pub const HOLD_REF_PREFIX: &str = "refs/depcache/incoming/";

/// Attempts at a config write that loses a lock race
const CONFIG_LOCK_ATTEMPTS: u32 = 5;

/// A fresh hold ref, named `<unix seconds>-<uuid>` so stale holds can be swept
pub fn hold_ref() -> String {
    format!(
        "{}{}-{}",
        HOLD_REF_PREFIX,
        chrono::Utc::now().timestamp(),
        Uuid::new_v4()
    )
}

/// Age of a hold ref created by `hold_ref`
pub fn hold_age(name: &str) -> Option<Duration> {
    let created: i64 = name
        .strip_prefix(HOLD_REF_PREFIX)?
        .split_once('-')?
        .0
        .parse()
        .ok()?;
    let age = chrono::Utc::now().timestamp().saturating_sub(created);
    Some(Duration::from_secs(u64::try_from(age).unwrap_or(0)))
}

/// How much of a remote a fetch into the Omnicache transfers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Only the requested reference
    #[default]
    Revision,
    /// Every branch and tag of the remote, under per-remote namespaces
    Repository,
}

/// A reference resolved against its remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    /// Commit the reference points at
    pub commit: String,
    /// What to ask the remote for (a full ref name, or the commit itself)
    pub source: String,
}

/// Thin async wrapper around the `git` executable
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl GitCli {
    /// Use the `git` found on PATH
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    /// Use a specific git executable
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Check if git is installed
    pub async fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Execute a git command and return the output
    pub(crate) async fn exec(&self, dir: Option<&Path>, args: &[&str]) -> DepcacheResult<Output> {
        debug!("Executing: git {:?}", args);

        let mut command = Command::new(&self.program);
        if let Some(dir) = dir {
            command.arg("-C").arg(dir);
        }

        command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DepcacheError::command_failed(format!("git {:?}", args), e))
    }

    /// Run a local command, failing on non-zero exit
    async fn run(&self, dir: Option<&Path>, args: &[&str]) -> DepcacheResult<String> {
        let output = self.exec(dir, args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(DepcacheError::command_exec(
                format!("git {}", args.join(" ")),
                String::from_utf8_lossy(&output.stderr).trim(),
            ))
        }
    }

    /// Run a command that talks to `remote`, classifying failures
    async fn run_remote(&self, dir: Option<&Path>, args: &[&str], remote: &str) -> DepcacheResult<String> {
        let output = self.exec(dir, args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(classify_remote_failure(
                remote,
                &String::from_utf8_lossy(&output.stderr),
            ))
        }
    }

    /// List the refs a remote advertises as `(commit, refname)` pairs
    pub async fn ls_remote(&self, url: &str) -> DepcacheResult<Vec<(String, String)>> {
        let stdout = self.run_remote(None, &["ls-remote", url], url).await?;
        Ok(parse_ls_remote(&stdout))
    }

    /// Resolve a reference to the commit it currently names
    ///
    /// A full commit id is taken as-is without contacting the remote.
    pub async fn resolve(&self, spec: &GitSpec) -> DepcacheResult<ResolvedRef> {
        if is_full_commit_id(&spec.reference) {
            let commit = spec.reference.to_ascii_lowercase();
            return Ok(ResolvedRef {
                source: commit.clone(),
                commit,
            });
        }

        let advertised = self.ls_remote(&spec.url).await?;
        let resolved = select_ref(&advertised, &spec.reference).ok_or_else(|| {
            DepcacheError::NotFound(format!("{} has no ref '{}'", spec.url, spec.reference))
        })?;

        debug!(
            reference = %spec.reference,
            source = %resolved.source,
            commit = %resolved.commit,
            "Resolved git reference"
        );
        Ok(resolved)
    }

    /// Create a bare repository suitable as a shared object store
    ///
    /// Safe to call on an existing repository, including one another
    /// process is initializing at the same time.
    pub async fn init_bare(&self, path: &Path) -> DepcacheResult<()> {
        let path_str = path.to_string_lossy();
        if let Err(e) = self.run(None, &["init", "--bare", "--quiet", &path_str]).await {
            if !path.join("HEAD").is_file() {
                return Err(e);
            }
            debug!("Concurrent init of {}: {}", path.display(), e);
        }
        self.ensure_config(path, "uploadpack.allowAnySHA1InWant", "true")
            .await?;
        self.ensure_config(path, "gc.auto", "0").await
    }

    /// Current value of a repository config key
    async fn config_value(&self, repo: &Path, key: &str) -> Option<String> {
        let output = self.exec(Some(repo), &["config", "--get", key]).await.ok()?;
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Set a repository config value unless it already has that value
    ///
    /// Another process holding the config lock is waited out briefly.
    pub async fn ensure_config(&self, repo: &Path, key: &str, value: &str) -> DepcacheResult<()> {
        let mut attempt = 1;
        loop {
            if self.config_value(repo, key).await.as_deref() == Some(value) {
                return Ok(());
            }
            match self.run(Some(repo), &["config", key, value]).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < CONFIG_LOCK_ATTEMPTS => {
                    trace!(key, attempt, "Config write failed: {}", e);
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Whether `repo` contains `commit` as a commit object
    pub async fn has_commit(&self, repo: &Path, commit: &str) -> bool {
        let object = format!("{}^{{commit}}", commit);
        self.exec(Some(repo), &["cat-file", "-e", &object])
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Root tree of `commit`, if the commit is present
    pub async fn tree_of(&self, repo: &Path, commit: &str) -> DepcacheResult<Option<String>> {
        let object = format!("{}^{{tree}}", commit);
        let output = self
            .exec(Some(repo), &["rev-parse", "--verify", "--quiet", &object])
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }

    /// Whether every object reachable from `commit` is present
    pub async fn is_complete(&self, repo: &Path, commit: &str) -> bool {
        self.exec(Some(repo), &["rev-list", "--objects", "--quiet", commit])
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Objects reachable from `commit` and their on-disk size in bytes
    ///
    /// `None` when git cannot tell (older than 2.31, or objects missing).
    pub async fn disk_usage(&self, repo: &Path, commit: &str) -> Option<u64> {
        let output = self
            .exec(Some(repo), &["rev-list", "--objects", "--disk-usage", commit])
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout).trim().parse().ok()
    }

    /// Fetch `resolved` from `url` into the bare repository `repo`
    ///
    /// On success the fetched commit is left reachable from the ref `hold`
    /// until the caller deletes it. Returns the commit that was actually
    /// fetched, which differs from `resolved.commit` only if a branch moved
    /// since it was resolved.
    pub async fn fetch_into(
        &self,
        repo: &Path,
        url: &str,
        resolved: &ResolvedRef,
        granularity: Granularity,
        hold: &str,
    ) -> DepcacheResult<String> {
        let mut refspecs = vec![format!("+{}:{}", resolved.source, hold)];

        if granularity == Granularity::Repository {
            let key = crate::cache::fingerprint::repository_key(url);
            refspecs.push(format!("+refs/heads/*:refs/remotes/{}/*", key));
            refspecs.push(format!("+refs/tags/*:refs/rtags/{}/*", key));
        }

        info!("Fetching {} from {}", resolved.source, url);

        let mut args = vec!["fetch", "--quiet", "--no-tags", "--no-write-fetch-head", url];
        args.extend(refspecs.iter().map(String::as_str));
        let commit = match self.run_remote(Some(repo), &args, url).await {
            Ok(_) => self.peel_commit(repo, hold).await?,
            // Another writer may hold a lock on a mirrored ref; the fetch
            // still counts if the requested commit arrived
            Err(e) => match self.peel_commit(repo, hold).await {
                Ok(commit) => {
                    debug!("Fetch of {} reported errors after updating {}: {}", url, hold, e);
                    commit
                }
                Err(_) => {
                    let _ = self.delete_ref(repo, hold).await;
                    return Err(e);
                }
            },
        };

        if commit != resolved.commit {
            debug!(
                expected = %resolved.commit,
                fetched = %commit,
                "Reference moved during fetch"
            );
        }
        Ok(commit)
    }

    /// Commit a ref (or annotated tag) points at
    async fn peel_commit(&self, repo: &Path, name: &str) -> DepcacheResult<String> {
        let object = format!("{}^{{commit}}", name);
        let stdout = self
            .run(Some(repo), &["rev-parse", "--verify", "--quiet", &object])
            .await?;
        Ok(stdout.trim().to_string())
    }

    /// Current value of a ref
    pub async fn read_ref(&self, repo: &Path, name: &str) -> Option<String> {
        let output = self
            .exec(Some(repo), &["rev-parse", "--verify", "--quiet", name])
            .await
            .ok()?;
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Point `name` at `commit`
    ///
    /// Losing a ref-lock race to another writer is success if the ref ends up
    /// at the same commit.
    pub async fn update_ref(&self, repo: &Path, name: &str, commit: &str) -> DepcacheResult<()> {
        match self.run(Some(repo), &["update-ref", name, commit]).await {
            Ok(_) => Ok(()),
            Err(e) => match self.read_ref(repo, name).await {
                Some(current) if current.eq_ignore_ascii_case(commit) => {
                    trace!(name, "Ref already updated by another writer");
                    Ok(())
                }
                _ => Err(e),
            },
        }
    }

    /// Delete a ref; a missing ref is not an error
    pub async fn delete_ref(&self, repo: &Path, name: &str) -> DepcacheResult<()> {
        if self.read_ref(repo, name).await.is_none() {
            return Ok(());
        }
        self.run(Some(repo), &["update-ref", "-d", name]).await?;
        Ok(())
    }

    /// Refs under `prefix` as `(refname, commit)` pairs
    pub async fn list_refs(&self, repo: &Path, prefix: &str) -> DepcacheResult<Vec<(String, String)>> {
        let stdout = self
            .run(
                Some(repo),
                &["for-each-ref", "--format=%(refname) %(objectname)", prefix],
            )
            .await?;
        Ok(stdout
            .lines()
            .filter_map(|line| line.split_once(' '))
            .map(|(name, commit)| (name.to_string(), commit.to_string()))
            .collect())
    }

    /// Repack and prune unreachable objects older than `grace`
    ///
    /// Objects written by a fetch in flight are unreferenced until its ref
    /// update lands, so they must not be pruned immediately.
    pub async fn gc(&self, repo: &Path, grace: Duration) -> DepcacheResult<()> {
        let prune = format!("--prune={}.seconds.ago", grace.as_secs());
        self.run(Some(repo), &["gc", "--quiet", &prune]).await?;
        Ok(())
    }

    /// Create a non-bare repository at `dest` checked out at `commit` from
    /// the local object store `source`, with `origin` set to `url`
    pub async fn checkout(&self, source: &Path, commit: &str, url: &str, dest: &Path) -> DepcacheResult<()> {
        let dest_str = dest.to_string_lossy();
        let source_str = source.to_string_lossy();

        self.run(
            None,
            &["-c", "init.defaultBranch=main", "init", "--quiet", &dest_str],
        )
        .await?;
        self.run(
            Some(dest),
            &["fetch", "--quiet", "--no-tags", &source_str, commit],
        )
        .await?;
        self.run(
            Some(dest),
            &["-c", "advice.detachedHead=false", "checkout", "--quiet", "--force", "--detach", commit],
        )
        .await?;
        self.run(Some(dest), &["remote", "add", "origin", url]).await?;

        let fetch_head = dest.join(".git").join("FETCH_HEAD");
        match tokio::fs::remove_file(&fetch_head).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DepcacheError::io(format!("removing {}", fetch_head.display()), e)),
        }
    }

    /// Commit checked out in a working tree
    pub async fn head_commit(&self, worktree: &Path) -> DepcacheResult<String> {
        let stdout = self.run(Some(worktree), &["rev-parse", "HEAD"]).await?;
        Ok(stdout.trim().to_string())
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `git ls-remote` output
fn parse_ls_remote(stdout: &str) -> Vec<(String, String)> {
    stdout
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .map(|(commit, name)| (commit.trim().to_string(), name.trim().to_string()))
        .collect()
}

/// Pick the advertised ref a user-supplied reference names
///
/// Tags win over branches, and an annotated tag resolves to the commit it
/// points at.
fn select_ref(advertised: &[(String, String)], reference: &str) -> Option<ResolvedRef> {
    let lookup = |name: &str| {
        advertised
            .iter()
            .find(|(_, n)| n == name)
            .map(|(commit, _)| commit.clone())
    };

    let candidates: Vec<String> = if reference.starts_with("refs/") || reference == "HEAD" {
        vec![reference.to_string()]
    } else {
        vec![
            format!("refs/tags/{}", reference),
            format!("refs/heads/{}", reference),
        ]
    };

    candidates.into_iter().find_map(|name| {
        let peeled = lookup(&format!("{}^{{}}", name));
        let direct = lookup(&name)?;
        Some(ResolvedRef {
            commit: peeled.unwrap_or(direct),
            source: name,
        })
    })
}

/// Map git's stderr for a failed remote operation onto the error taxonomy
pub(crate) fn classify_remote_failure(remote: &str, stderr: &str) -> DepcacheError {
    let reason = stderr.trim().to_string();
    let lower = reason.to_ascii_lowercase();

    const AUTH: &[&str] = &[
        "authentication failed",
        "could not read username",
        "could not read password",
        "permission denied",
        "terminal prompts disabled",
        "http 401",
        "http 403",
        "returned error: 401",
        "returned error: 403",
    ];
    const NOT_FOUND: &[&str] = &[
        "repository not found",
        "does not appear to be a git repository",
        "couldn't find remote ref",
        "not our ref",
        "no such remote ref",
        "returned error: 404",
        "http 404",
    ];

    if AUTH.iter().any(|needle| lower.contains(needle)) {
        DepcacheError::AuthError {
            remote: remote.to_string(),
            reason,
        }
    } else if NOT_FOUND.iter().any(|needle| lower.contains(needle)) {
        DepcacheError::NotFound(format!("{}: {}", remote, reason))
    } else {
        DepcacheError::RemoteUnavailable {
            remote: remote.to_string(),
            reason,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const LS_REMOTE: &str = "\
1111111111111111111111111111111111111111\tHEAD
1111111111111111111111111111111111111111\trefs/heads/main
2222222222222222222222222222222222222222\trefs/heads/v1.2.3
3333333333333333333333333333333333333333\trefs/tags/v1.2.3
4444444444444444444444444444444444444444\trefs/tags/v1.2.3^{}
5555555555555555555555555555555555555555\trefs/tags/light
";

    /// Build a repository with two commits, an annotated tag `v1.2.3` on the
    /// first, and `main` on the second. Returns `None` when git is missing.
    pub(crate) async fn fixture_repo(temp: &TempDir) -> Option<PathBuf> {
        let git = GitCli::new();
        if !git.is_available().await {
            eprintln!("git not installed, skipping");
            return None;
        }

        let repo = temp.path().join("upstream");
        std::fs::create_dir_all(&repo).unwrap();
        let ident = ["-c", "user.name=Test", "-c", "user.email=test@example.org"];

        git.run(Some(&repo), &["-c", "init.defaultBranch=main", "init", "--quiet"])
            .await
            .unwrap();

        std::fs::write(repo.join("README.md"), "v1\n").unwrap();
        std::fs::create_dir_all(repo.join("src")).unwrap();
        std::fs::write(repo.join("src/lib.c"), "int x;\n").unwrap();
        git.run(Some(&repo), &["add", "."]).await.unwrap();
        let mut commit = ident.to_vec();
        commit.extend(["commit", "--quiet", "-m", "first"]);
        git.run(Some(&repo), &commit).await.unwrap();
        let mut tag = ident.to_vec();
        tag.extend(["tag", "-a", "v1.2.3", "-m", "release"]);
        git.run(Some(&repo), &tag).await.unwrap();

        std::fs::write(repo.join("README.md"), "v2\n").unwrap();
        git.run(Some(&repo), &["add", "."]).await.unwrap();
        let mut commit = ident.to_vec();
        commit.extend(["commit", "--quiet", "-m", "second"]);
        git.run(Some(&repo), &commit).await.unwrap();

        Some(repo)
    }

    #[test]
    fn parse_ls_remote_lines() {
        let refs = parse_ls_remote(LS_REMOTE);
        assert_eq!(refs.len(), 6);
        assert_eq!(refs[1].1, "refs/heads/main");
    }

    #[test]
    fn tag_wins_and_is_peeled() {
        let refs = parse_ls_remote(LS_REMOTE);
        let resolved = select_ref(&refs, "v1.2.3").unwrap();
        assert_eq!(resolved.source, "refs/tags/v1.2.3");
        assert_eq!(resolved.commit, "4".repeat(40));
    }

    #[test]
    fn lightweight_tag_and_branch() {
        let refs = parse_ls_remote(LS_REMOTE);
        assert_eq!(select_ref(&refs, "light").unwrap().commit, "5".repeat(40));
        let main = select_ref(&refs, "main").unwrap();
        assert_eq!(main.source, "refs/heads/main");
        assert_eq!(main.commit, "1".repeat(40));
    }

    #[test]
    fn full_ref_names_and_head() {
        let refs = parse_ls_remote(LS_REMOTE);
        assert_eq!(
            select_ref(&refs, "refs/heads/v1.2.3").unwrap().commit,
            "2".repeat(40)
        );
        assert_eq!(select_ref(&refs, "HEAD").unwrap().commit, "1".repeat(40));
        assert!(select_ref(&refs, "missing").is_none());
    }

    #[test]
    fn classify_failures() {
        assert!(matches!(
            classify_remote_failure("r", "fatal: Authentication failed for 'https://x/'"),
            DepcacheError::AuthError { .. }
        ));
        assert!(matches!(
            classify_remote_failure("r", "remote: Repository not found.\nfatal: repository 'x' not found"),
            DepcacheError::NotFound(_)
        ));
        assert!(matches!(
            classify_remote_failure("r", "fatal: unable to access 'x': Could not resolve host: x"),
            DepcacheError::RemoteUnavailable { .. }
        ));
    }

    #[tokio::test]
    async fn resolve_full_commit_skips_remote() {
        let git = GitCli::with_program("/nonexistent/git");
        let spec = GitSpec {
            url: "https://example.org/repo.git".to_string(),
            reference: "ABCDEF0123456789ABCDEF0123456789ABCDEF01".to_string(),
        };
        let resolved = git.resolve(&spec).await.unwrap();
        assert_eq!(resolved.commit, "abcdef0123456789abcdef0123456789abcdef01");
    }

    #[tokio::test]
    async fn resolve_against_local_remote() {
        let temp = TempDir::new().unwrap();
        let Some(upstream) = fixture_repo(&temp).await else {
            return;
        };
        let git = GitCli::new();
        let url = upstream.to_string_lossy().to_string();

        let tag = git
            .resolve(&GitSpec {
                url: url.clone(),
                reference: "v1.2.3".to_string(),
            })
            .await
            .unwrap();
        let main = git
            .resolve(&GitSpec {
                url: url.clone(),
                reference: "main".to_string(),
            })
            .await
            .unwrap();
        assert_ne!(tag.commit, main.commit);

        let missing = git
            .resolve(&GitSpec {
                url,
                reference: "nope".to_string(),
            })
            .await;
        assert!(matches!(missing, Err(DepcacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn fetch_into_bare_repository() {
        let temp = TempDir::new().unwrap();
        let Some(upstream) = fixture_repo(&temp).await else {
            return;
        };
        let git = GitCli::new();
        let url = upstream.to_string_lossy().to_string();
        let store = temp.path().join("store.git");
        git.init_bare(&store).await.unwrap();
        git.init_bare(&store).await.unwrap();

        let resolved = git
            .resolve(&GitSpec {
                url: url.clone(),
                reference: "v1.2.3".to_string(),
            })
            .await
            .unwrap();
        let hold = hold_ref();
        let fetched = git
            .fetch_into(&store, &url, &resolved, Granularity::Repository, &hold)
            .await
            .unwrap();

        assert_eq!(fetched, resolved.commit);
        assert!(git.has_commit(&store, &fetched).await);
        assert!(git.tree_of(&store, &fetched).await.unwrap().is_some());
        assert!(git.disk_usage(&store, &fetched).await.unwrap_or(1) > 0);
        assert!(!git.list_refs(&store, "refs/remotes/").await.unwrap().is_empty());

        // The commit stays reachable until the hold is released
        let held = git.read_ref(&store, &hold).await.unwrap();
        assert_eq!(git.peel_commit(&store, &held).await.unwrap(), fetched);
        git.delete_ref(&store, &hold).await.unwrap();
        assert!(git.list_refs(&store, HOLD_REF_PREFIX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_leaves_no_hold() {
        let temp = TempDir::new().unwrap();
        let Some(upstream) = fixture_repo(&temp).await else {
            return;
        };
        let git = GitCli::new();
        let store = temp.path().join("store.git");
        git.init_bare(&store).await.unwrap();

        let resolved = ResolvedRef {
            commit: "1".repeat(40),
            source: "refs/heads/nope".to_string(),
        };
        let err = git
            .fetch_into(
                &store,
                &upstream.to_string_lossy(),
                &resolved,
                Granularity::Revision,
                &hold_ref(),
            )
            .await
            .unwrap_err();
        assert!(err.is_remote());
        assert!(git.list_refs(&store, HOLD_REF_PREFIX).await.unwrap().is_empty());
    }

    #[test]
    fn hold_refs_carry_their_age() {
        let fresh = hold_ref();
        assert!(fresh.starts_with(HOLD_REF_PREFIX));
        assert!(hold_age(&fresh).unwrap() < Duration::from_secs(60));

        let old = format!("{}{}-x", HOLD_REF_PREFIX, chrono::Utc::now().timestamp() - 7200);
        assert!(hold_age(&old).unwrap() >= Duration::from_secs(7200));
        assert_eq!(hold_age("refs/depcache/incoming/garbage"), None);
        assert_eq!(hold_age("refs/heads/main"), None);
    }

    #[tokio::test]
    async fn update_ref_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let Some(upstream) = fixture_repo(&temp).await else {
            return;
        };
        let git = GitCli::new();
        let head = git.head_commit(&upstream).await.unwrap();
        let pin = format!("{}test", PIN_REF_PREFIX);

        git.update_ref(&upstream, &pin, &head).await.unwrap();
        git.update_ref(&upstream, &pin, &head).await.unwrap();
        assert_eq!(git.read_ref(&upstream, &pin).await.as_deref(), Some(head.as_str()));

        git.delete_ref(&upstream, &pin).await.unwrap();
        git.delete_ref(&upstream, &pin).await.unwrap();
        assert!(git.read_ref(&upstream, &pin).await.is_none());
    }
}
