//! Append-only build output bundle and its on-disk export.
//!
//! A [`Bundle`] maps well-known output names to artifacts. Names are never
//! overwritten; inserting a name twice is a construction bug. Export
//! materializes every entry into an output directory (temp file, then
//! rename) and writes `manifest.json` with checksums.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use headway_shared::{HeadwayError, Result};

use crate::artifact::{Artifact, Packaging};
use crate::digest::file_digest;

/// Name of the manifest written next to exported entries.
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    artifact: Artifact,
    packaging: Packaging,
}

/// Flat, append-only mapping of output names to artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    entries: BTreeMap<String, Entry>,
}

/// One exported entry as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub sha256: String,
    pub size_bytes: u64,
}

/// `manifest.json` contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleManifest {
    pub created_at: DateTime<Utc>,
    pub entries: Vec<ManifestEntry>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry copied as-is on export. Must be a file.
    pub fn insert(&mut self, name: impl Into<String>, artifact: Artifact) -> Result<()> {
        let name = name.into();
        if artifact.is_directory() {
            return Err(HeadwayError::invariant(format!(
                "bundle entry '{name}' is a directory and must be compressed"
            )));
        }
        self.push(name, artifact, Packaging::AsIs)
    }

    /// Add an entry compressed on export.
    pub fn insert_compressed(&mut self, name: impl Into<String>, artifact: Artifact) -> Result<()> {
        self.push(name.into(), artifact, Packaging::Compressed)
    }

    fn push(&mut self, name: String, artifact: Artifact, packaging: Packaging) -> Result<()> {
        if self.entries.contains_key(&name) {
            return Err(HeadwayError::invariant(format!(
                "bundle already contains '{name}'"
            )));
        }
        debug!(%name, src = %artifact.path().display(), "bundle entry added");
        self.entries.insert(
            name,
            Entry {
                artifact,
                packaging,
            },
        );
        Ok(())
    }

    /// Append every entry of `other`. Any shared name is an invariant violation.
    pub fn merge(&mut self, other: Bundle) -> Result<()> {
        if let Some(dup) = other.entries.keys().find(|k| self.entries.contains_key(*k)) {
            return Err(HeadwayError::invariant(format!(
                "bundle merge collision on '{dup}'"
            )));
        }
        self.entries.extend(other.entries);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.entries.get(name).map(|e| &e.artifact)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Entry names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Materialize every entry under `dir` and write the manifest.
    #[instrument(skip_all, fields(dir = %dir.display(), entries = self.entries.len()))]
    pub fn export(&self, dir: &Path) -> Result<BundleManifest> {
        std::fs::create_dir_all(dir).map_err(|e| HeadwayError::io(dir, e))?;

        let mut entries = Vec::with_capacity(self.entries.len());
        for (name, entry) in &self.entries {
            let target = dir.join(name);
            let temp = dir.join(format!(".{name}.tmp"));

            match entry.packaging {
                Packaging::AsIs => {
                    std::fs::copy(entry.artifact.path(), &temp)
                        .map_err(|e| HeadwayError::io(entry.artifact.path(), e))?;
                }
                Packaging::Compressed => entry.artifact.compress_to(&temp)?,
            }
            std::fs::rename(&temp, &target).map_err(|e| HeadwayError::io(&target, e))?;

            let size_bytes = std::fs::metadata(&target)
                .map_err(|e| HeadwayError::io(&target, e))?
                .len();
            let sha256 = file_digest(&target)?;
            debug!(%name, size_bytes, "exported bundle entry");

            entries.push(ManifestEntry {
                name: name.clone(),
                sha256,
                size_bytes,
            });
        }

        let manifest = BundleManifest {
            created_at: Utc::now(),
            entries,
        };
        write_manifest(&dir.join(MANIFEST_FILE), &manifest)?;

        info!(count = manifest.entries.len(), "bundle export complete");
        Ok(manifest)
    }
}

fn write_manifest(path: &Path, manifest: &BundleManifest) -> Result<()> {
    let json = serde_json::to_string_pretty(manifest)
        .map_err(|e| HeadwayError::validation(format!("JSON serialization failed: {e}")))?;
    std::fs::write(path, json).map_err(|e| HeadwayError::io(path, e))
}

/// Read a manifest written by [`Bundle::export`].
pub fn read_manifest(dir: &Path) -> Result<BundleManifest> {
    let path: PathBuf = dir.join(MANIFEST_FILE);
    let content = std::fs::read_to_string(&path).map_err(|e| HeadwayError::io(&path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| HeadwayError::validation(format!("invalid {MANIFEST_FILE}: {e}")))
}
