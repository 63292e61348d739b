//! Materializer
//!
//! Turns a raw object into the on-disk artifact. The output depends only on
//! the identifier and the object, never on where the object came from, and
//! the destination is replaced rather than merged into.
//!
//! Work happens in a private sibling of the destination which is renamed
//! into place at the end, so an interrupted run never leaves a half-written
//! destination behind.

use crate::backend::{GitCli, RawObject};
use crate::error::{DepcacheError, DepcacheResult};
use crate::identifier::{ArchiveKind, ArtifactIdentifier};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace};

/// Paths inside a `.nupkg` that belong to the OPC container, not the package
const NUPKG_METADATA: &[&str] = &["_rels/", "package/", "[Content_Types].xml"];

/// Where the content of a materialized artifact came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    CacheHit,
    CacheMiss,
    Bypass,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CacheHit => write!(f, "cache hit"),
            Self::CacheMiss => write!(f, "cache miss"),
            Self::Bypass => write!(f, "cache bypass"),
        }
    }
}

/// An artifact placed on disk for the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterializedArtifact {
    pub path: PathBuf,
    /// SHA-256 of the fetched blob, or the checked-out commit
    pub digest: String,
    /// Diagnostic only; never affects the artifact's content
    pub provenance: Provenance,
}

/// Places raw objects at their destination
#[derive(Debug, Clone, Default)]
pub struct Materializer {
    git: GitCli,
}

impl Materializer {
    pub fn new(git: GitCli) -> Self {
        Self { git }
    }

    /// Materialize `object` for `id` at `dest`, replacing whatever is there
    pub async fn materialize(
        &self,
        id: &ArtifactIdentifier,
        object: &RawObject,
        dest: &Path,
        provenance: Provenance,
    ) -> DepcacheResult<MaterializedArtifact> {
        let work = work_dir(dest)?;
        let out = work.path().join("out");

        let digest = match (id, object) {
            (ArtifactIdentifier::Git(spec), RawObject::Commit { repo, commit }) => {
                self.git.checkout(repo, commit, &spec.url, &out).await?;
                commit.clone()
            }
            (_, RawObject::Blob { path, sha256, .. }) => {
                let layout = BlobLayout::for_identifier(id)?;
                let source = path.clone();
                let target = out.clone();
                tokio::task::spawn_blocking(move || layout.place(&source, &target))
                    .await
                    .map_err(|e| DepcacheError::Internal(format!("extract task failed: {}", e)))??;
                sha256.clone()
            }
            (id, object) => {
                return Err(DepcacheError::Internal(format!(
                    "cannot materialize {:?} for {}",
                    object, id
                )))
            }
        };

        replace_destination(&out, dest)?;
        debug!(dest = %dest.display(), %provenance, "Materialized {}", id);

        Ok(MaterializedArtifact {
            path: dest.to_path_buf(),
            digest,
            provenance,
        })
    }
}

/// Scratch directory next to `dest`, on the same filesystem
fn work_dir(dest: &Path) -> DepcacheResult<tempfile::TempDir> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .map_err(|e| DepcacheError::io(format!("creating {}", parent.display()), e))?;
    tempfile::Builder::new()
        .prefix(".depcache-")
        .tempdir_in(&parent)
        .map_err(|e| DepcacheError::io(format!("creating work dir in {}", parent.display()), e))
}

fn replace_destination(out: &Path, dest: &Path) -> DepcacheResult<()> {
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(dest),
        Ok(_) => fs::remove_file(dest),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
    .map_err(|e| DepcacheError::io(format!("clearing {}", dest.display()), e))?;

    fs::rename(out, dest)
        .map_err(|e| DepcacheError::io(format!("moving artifact to {}", dest.display()), e))
}

/// How a blob maps onto the destination tree
#[derive(Debug, Clone)]
struct BlobLayout {
    archive: ArchiveKind,
    /// Archive subtree that becomes the destination root
    subtree: Option<PathBuf>,
    /// Name of a plain download inside the destination
    file_name: PathBuf,
    nupkg: bool,
}

impl BlobLayout {
    fn for_identifier(id: &ArtifactIdentifier) -> DepcacheResult<Self> {
        match id {
            ArtifactIdentifier::Nuget(spec) => Ok(Self {
                archive: ArchiveKind::Zip,
                subtree: None,
                file_name: PathBuf::from(format!("{}.{}.nupkg", spec.name, spec.version)),
                nupkg: true,
            }),
            ArtifactIdentifier::Web(spec) => {
                let subtree = match (spec.archive, spec.internal_path.as_deref()) {
                    (ArchiveKind::None, _) | (_, None) => None,
                    (_, Some(path)) => relative_path(path)?,
                };
                Ok(Self {
                    archive: spec.archive,
                    subtree,
                    file_name: relative_path(&spec.file_name())?
                        .unwrap_or_else(|| PathBuf::from(&spec.name)),
                    nupkg: false,
                })
            }
            ArtifactIdentifier::Git(_) => Err(DepcacheError::Internal(
                "git identifiers are not blobs".to_string(),
            )),
        }
    }

    fn place(&self, blob: &Path, out: &Path) -> DepcacheResult<()> {
        if self.archive == ArchiveKind::None {
            let target = out.join(&self.file_name);
            create_parent(&target)?;
            fs::copy(blob, &target)
                .map_err(|e| DepcacheError::io(format!("copying to {}", target.display()), e))?;
            return Ok(());
        }

        let Some(subtree) = &self.subtree else {
            return self.extract(blob, out);
        };

        let staging = out.with_extension("raw");
        self.extract(blob, &staging)?;
        let selected = staging.join(subtree);
        if !selected.exists() {
            return Err(DepcacheError::Extract {
                path: blob.to_path_buf(),
                reason: format!("archive has no '{}'", subtree.display()),
            });
        }

        if selected.is_dir() {
            fs::rename(&selected, out)
        } else {
            fs::create_dir_all(out).and_then(|_| {
                let name = selected.file_name().unwrap_or(selected.as_os_str());
                fs::rename(&selected, out.join(name))
            })
        }
        .map_err(|e| DepcacheError::io(format!("selecting {}", subtree.display()), e))?;

        fs::remove_dir_all(&staging)
            .map_err(|e| DepcacheError::io(format!("removing {}", staging.display()), e))
    }

    fn extract(&self, blob: &Path, into: &Path) -> DepcacheResult<()> {
        fs::create_dir_all(into)
            .map_err(|e| DepcacheError::io(format!("creating {}", into.display()), e))?;
        match self.archive {
            ArchiveKind::TarGz => extract_tar_gz(blob, into),
            ArchiveKind::Zip => extract_zip(blob, into, self.nupkg),
            ArchiveKind::None => Ok(()),
        }
    }
}

fn extract_tar_gz(blob: &Path, into: &Path) -> DepcacheResult<()> {
    let extract_err = |reason: String| DepcacheError::Extract {
        path: blob.to_path_buf(),
        reason,
    };

    let file = fs::File::open(blob).map_err(|e| extract_err(e.to_string()))?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    for entry in archive.entries().map_err(|e| extract_err(e.to_string()))? {
        let mut entry = entry.map_err(|e| extract_err(e.to_string()))?;
        let name = entry
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let inside = entry.unpack_in(into).map_err(|e| extract_err(e.to_string()))?;
        if !inside {
            return Err(extract_err(format!("entry '{}' escapes the destination", name)));
        }
        trace!(entry = %name, "Extracted");
    }
    Ok(())
}

fn extract_zip(blob: &Path, into: &Path, nupkg: bool) -> DepcacheResult<()> {
    let extract_err = |reason: String| DepcacheError::Extract {
        path: blob.to_path_buf(),
        reason,
    };

    let file = fs::File::open(blob).map_err(|e| extract_err(e.to_string()))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| extract_err(e.to_string()))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| extract_err(e.to_string()))?;

        if nupkg && NUPKG_METADATA.iter().any(|m| entry.name().starts_with(m)) {
            continue;
        }

        let relative = entry
            .enclosed_name()
            .ok_or_else(|| extract_err(format!("entry '{}' escapes the destination", entry.name())))?;
        let target = into.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| DepcacheError::io(format!("creating {}", target.display()), e))?;
            continue;
        }

        create_parent(&target)?;
        let mut out = fs::File::create(&target)
            .map_err(|e| DepcacheError::io(format!("creating {}", target.display()), e))?;
        io::copy(&mut entry, &mut out).map_err(|e| extract_err(e.to_string()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))
                .map_err(|e| DepcacheError::io(format!("setting mode on {}", target.display()), e))?;
        }
    }
    Ok(())
}

fn create_parent(path: &Path) -> DepcacheResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| DepcacheError::io(format!("creating {}", parent.display()), e))?;
    }
    Ok(())
}

/// Validate a user-supplied relative path; `None` for the root itself
fn relative_path(raw: &str) -> DepcacheResult<Option<PathBuf>> {
    let mut clean = PathBuf::new();
    for component in Path::new(raw.trim_matches('/')).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => {
                return Err(DepcacheError::InvalidIdentifier(format!(
                    "path '{}' must stay inside the destination",
                    raw
                )))
            }
        }
    }
    Ok((!clean.as_os_str().is_empty()).then_some(clean))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::identifier::WebSpec;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;

    pub(crate) fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(io::Cursor::new(Vec::new()));
        for (name, body) in files {
            let options = FileOptions::<()>::default().unix_permissions(0o755);
            writer.start_file(*name, options).unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn tar_gz_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, body) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *body).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn web(archive: ArchiveKind, internal_path: Option<&str>) -> ArtifactIdentifier {
        ArtifactIdentifier::Web(WebSpec {
            url: "https://example.org/dl/tool-1.0.bin".to_string(),
            name: "tool".to_string(),
            version: "1.0".to_string(),
            sha256: None,
            archive,
            internal_path: internal_path.map(str::to_string),
        })
    }

    fn blob(temp: &TempDir, body: &[u8]) -> RawObject {
        let path = temp.path().join("object");
        fs::write(&path, body).unwrap();
        RawObject::Blob {
            path,
            size: body.len() as u64,
            sha256: "0".repeat(64),
        }
    }

    async fn run(id: &ArtifactIdentifier, object: &RawObject, dest: &Path) -> DepcacheResult<MaterializedArtifact> {
        Materializer::default()
            .materialize(id, object, dest, Provenance::Bypass)
            .await
    }

    #[tokio::test]
    async fn plain_file_uses_url_name() {
        let temp = TempDir::new().unwrap();
        let object = blob(&temp, b"exe");
        let dest = temp.path().join("dest");

        let artifact = run(&web(ArchiveKind::None, None), &object, &dest).await.unwrap();
        assert_eq!(fs::read(dest.join("tool-1.0.bin")).unwrap(), b"exe");
        assert_eq!(artifact.path, dest);
        // The blob itself is left in place
        assert!(temp.path().join("object").exists());
    }

    #[tokio::test]
    async fn destination_is_replaced() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("dest");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale.txt"), b"old").unwrap();

        let object = blob(&temp, b"exe");
        run(&web(ArchiveKind::None, None), &object, &dest).await.unwrap();
        assert!(!dest.join("stale.txt").exists());

        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".depcache-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn zip_with_subtree() {
        let temp = TempDir::new().unwrap();
        let object = blob(
            &temp,
            &zip_bytes(&[("pkg/bin/tool", b"bin"), ("pkg/README", b"doc"), ("other", b"x")]),
        );
        let dest = temp.path().join("dest");

        run(&web(ArchiveKind::Zip, Some("/pkg")), &object, &dest).await.unwrap();
        assert_eq!(fs::read(dest.join("bin/tool")).unwrap(), b"bin");
        assert!(dest.join("README").exists());
        assert!(!dest.join("other").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dest.join("bin/tool")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[tokio::test]
    async fn missing_subtree_fails() {
        let temp = TempDir::new().unwrap();
        let object = blob(&temp, &zip_bytes(&[("a", b"x")]));
        let err = run(&web(ArchiveKind::Zip, Some("nope")), &object, &temp.path().join("d"))
            .await
            .unwrap_err();
        assert!(matches!(err, DepcacheError::Extract { .. }));
    }

    #[tokio::test]
    async fn tar_gz_extracts() {
        let temp = TempDir::new().unwrap();
        let object = blob(&temp, &tar_gz_bytes(&[("dir/file.txt", b"hello")]));
        let dest = temp.path().join("dest");

        run(&web(ArchiveKind::TarGz, None), &object, &dest).await.unwrap();
        assert_eq!(fs::read(dest.join("dir/file.txt")).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn nupkg_drops_packaging_metadata() {
        let temp = TempDir::new().unwrap();
        let object = blob(
            &temp,
            &zip_bytes(&[
                ("_rels/.rels", b"r"),
                ("package/services/metadata/core-properties/x.psmdcp", b"p"),
                ("[Content_Types].xml", b"c"),
                ("ToolX.nuspec", b"spec"),
                ("tools/toolx.exe", b"exe"),
            ]),
        );
        let dest = temp.path().join("dest");

        run(&ArtifactIdentifier::nuget("ToolX", "2.0.0"), &object, &dest)
            .await
            .unwrap();

        let mut names: Vec<String> = fs::read_dir(&dest)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["ToolX.nuspec", "tools"]);
    }

    #[test]
    fn relative_path_rejects_escape() {
        assert!(relative_path("../etc").is_err());
        assert_eq!(relative_path("/").unwrap(), None);
        assert_eq!(relative_path("/a/./b/").unwrap(), Some(PathBuf::from("a/b")));
    }

    #[tokio::test]
    async fn git_object_needs_git_identifier() {
        let temp = TempDir::new().unwrap();
        let object = RawObject::Commit {
            repo: temp.path().to_path_buf(),
            commit: "1".repeat(40),
        };
        let err = run(&web(ArchiveKind::None, None), &object, &temp.path().join("d"))
            .await
            .unwrap_err();
        assert!(matches!(err, DepcacheError::Internal(_)));
    }
}
