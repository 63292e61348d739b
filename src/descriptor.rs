//! External dependency descriptors (`*_ext_dep.json`)

use crate::error::{DepcacheError, DepcacheResult};
use crate::identifier::{ArchiveKind, ArtifactIdentifier, GitSpec, NugetSpec, WebSpec};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

/// File name suffix that marks a descriptor
pub const DESCRIPTOR_SUFFIX: &str = "_ext_dep.json";

/// Suffix of the directory a dependency is materialized into
pub const OUTPUT_SUFFIX: &str = "_extdep";

/// One declared external dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtDepDescriptor {
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub source: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_type: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,

    /// File the descriptor was loaded from
    #[serde(skip)]
    pub path: PathBuf,
}

fn default_scope() -> String {
    "global".to_string()
}

impl ExtDepDescriptor {
    /// Load and check a descriptor file
    pub fn load(path: &Path) -> DepcacheResult<Self> {
        let raw = fs::read(path).map_err(|e| DepcacheError::io(format!("reading {}", path.display()), e))?;
        let mut descriptor: Self =
            serde_json::from_slice(&raw).map_err(|e| DepcacheError::DescriptorInvalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        descriptor.path = path.to_path_buf();

        if descriptor.name.trim().is_empty()
            || descriptor.name.contains(['/', '\\'])
            || descriptor.name.starts_with('.')
        {
            return Err(descriptor.invalid(format!("invalid name '{}'", descriptor.name)));
        }
        descriptor.identifier()?.validate().map_err(|e| descriptor.invalid(e.to_string()))?;
        Ok(descriptor)
    }

    /// Identifier this descriptor asks for
    pub fn identifier(&self) -> DepcacheResult<ArtifactIdentifier> {
        match self.kind.to_ascii_lowercase().as_str() {
            "nuget" => Ok(ArtifactIdentifier::Nuget(NugetSpec {
                name: self.name.clone(),
                version: self.version.clone(),
                feed: Some(self.source.clone()),
                sha256: self.sha256.clone(),
            })),
            "web" => Ok(ArtifactIdentifier::Web(WebSpec {
                url: self.source.clone(),
                name: self.name.clone(),
                version: self.version.clone(),
                sha256: self.sha256.clone(),
                archive: ArchiveKind::from_descriptor(self.compression_type.as_deref())
                    .map_err(|e| self.invalid(e.to_string()))?,
                internal_path: self.internal_path.clone(),
            })),
            "git" => Ok(ArtifactIdentifier::Git(GitSpec {
                url: self.source.clone(),
                reference: self.version.clone(),
            })),
            other => Err(self.invalid(format!("unsupported type '{}'", other))),
        }
    }

    /// Directory the dependency is materialized into
    pub fn output_dir(&self) -> PathBuf {
        self.path
            .parent()
            .unwrap_or(Path::new("."))
            .join(format!("{}{}", self.name, OUTPUT_SUFFIX))
    }

    fn invalid(&self, reason: String) -> DepcacheError {
        DepcacheError::DescriptorInvalid {
            path: self.path.clone(),
            reason,
        }
    }
}

/// Find descriptor files under `roots`, sorted
///
/// `.git` directories and existing `*_extdep` output directories are skipped.
pub fn discover(roots: &[PathBuf]) -> DepcacheResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    for root in roots {
        if root.is_file() {
            found.push(root.clone());
        } else {
            walk(root, &mut found)?;
        }
    }
    found.sort();
    found.dedup();
    Ok(found)
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) -> DepcacheResult<()> {
    let entries = fs::read_dir(dir).map_err(|e| DepcacheError::io(format!("reading {}", dir.display()), e))?;

    for entry in entries {
        let entry = entry.map_err(|e| DepcacheError::io(format!("reading {}", dir.display()), e))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry
            .file_type()
            .map_err(|e| DepcacheError::io(format!("reading {}", path.display()), e))?;

        if file_type.is_dir() {
            if name == ".git" || name.ends_with(OUTPUT_SUFFIX) {
                trace!(path = %path.display(), "Skipping directory");
                continue;
            }
            walk(&path, found)?;
        } else if file_type.is_file() && name.ends_with(DESCRIPTOR_SUFFIX) {
            found.push(path);
        }
    }
    Ok(())
}
