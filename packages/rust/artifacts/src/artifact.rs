//! The [`Artifact`] sum type and its compression contract.
//!
//! A build step produces either one file or one directory tree. Compression
//! turns a file into a single zstd stream and a directory into a deterministic
//! tar archive wrapped in zstd: entries sorted by path, zeroed timestamps and
//! ownership, so identical trees always produce identical bytes.

use std::fs::{File, Metadata};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use headway_shared::{HeadwayError, Result};

/// zstd level used for every bundle entry.
const ZSTD_LEVEL: i32 = 3;

/// Output of a build step: exactly one file or one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    File(PathBuf),
    Directory(PathBuf),
}

/// How a bundle entry is materialized on export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packaging {
    /// Copied byte for byte.
    AsIs,
    /// Compressed via [`Artifact::compress_to`].
    Compressed,
}

impl Artifact {
    /// Build from the optional-pair shape some collaborators report.
    ///
    /// Both or neither populated is a construction bug upstream and yields
    /// [`HeadwayError::Invariant`].
    pub fn from_parts(file: Option<PathBuf>, directory: Option<PathBuf>) -> Result<Self> {
        match (file, directory) {
            (Some(file), None) => Ok(Self::File(file)),
            (None, Some(dir)) => Ok(Self::Directory(dir)),
            (Some(file), Some(dir)) => Err(HeadwayError::invariant(format!(
                "artifact has both file {} and directory {}",
                file.display(),
                dir.display()
            ))),
            (None, None) => Err(HeadwayError::invariant(
                "artifact has neither a file nor a directory",
            )),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::File(p) | Self::Directory(p) => p,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory(_))
    }

    /// Compress into `dest`, replacing any existing file. Output goes to a
    /// sibling temporary first; `dest` is only touched once compression has
    /// fully succeeded.
    #[instrument(skip_all, fields(src = %self.path().display(), dest = %dest.display()))]
    pub fn compress_to(&self, dest: &Path) -> Result<()> {
        let partial = partial_path(dest);
        if let Err(e) = self.compress_into(&partial) {
            if let Err(cleanup) = std::fs::remove_file(&partial) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(partial = %partial.display(), error = %cleanup, "failed to remove partial output");
                }
            }
            return Err(e);
        }
        std::fs::rename(&partial, dest).map_err(|e| HeadwayError::io(dest, e))?;

        debug!("compressed artifact");
        Ok(())
    }

    fn compress_into(&self, out: &Path) -> Result<()> {
        let file = File::create(out).map_err(|e| HeadwayError::io(out, e))?;
        let writer = BufWriter::new(file);
        match self {
            Self::File(src) => compress_file(src, writer, out),
            Self::Directory(src) => archive_directory(src, writer, out),
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.partial"))
}

fn compress_file(src: &Path, writer: impl Write, dest: &Path) -> Result<()> {
    let input = File::open(src).map_err(|e| HeadwayError::io(src, e))?;
    let mut writer = writer;
    zstd::stream::copy_encode(BufReader::new(input), &mut writer, ZSTD_LEVEL)
        .map_err(|e| HeadwayError::io(dest, e))?;
    writer.flush().map_err(|e| HeadwayError::io(dest, e))
}

fn archive_directory(src: &Path, writer: impl Write, dest: &Path) -> Result<()> {
    let encoder =
        zstd::stream::Encoder::new(writer, ZSTD_LEVEL).map_err(|e| HeadwayError::io(dest, e))?;
    let mut builder = tar::Builder::new(encoder);

    for rel in sorted_entries(src)? {
        let full = src.join(&rel);
        let meta = std::fs::symlink_metadata(&full).map_err(|e| HeadwayError::io(&full, e))?;
        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(file_mode(&meta));

        let appended = if meta.file_type().is_symlink() {
            let target = std::fs::read_link(&full).map_err(|e| HeadwayError::io(&full, e))?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            builder.append_link(&mut header, &rel, target)
        } else if meta.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, &rel, std::io::empty())
        } else {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(meta.len());
            let file = File::open(&full).map_err(|e| HeadwayError::io(&full, e))?;
            builder.append_data(&mut header, &rel, BufReader::new(file))
        };
        appended.map_err(|e| HeadwayError::io(&full, e))?;
    }

    let encoder = builder.into_inner().map_err(|e| HeadwayError::io(dest, e))?;
    let mut writer = encoder.finish().map_err(|e| HeadwayError::io(dest, e))?;
    writer.flush().map_err(|e| HeadwayError::io(dest, e))
}

#[cfg(unix)]
fn file_mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    if meta.is_dir() || meta.permissions().mode() & 0o111 != 0 {
        0o755
    } else {
        0o644
    }
}

#[cfg(not(unix))]
fn file_mode(meta: &Metadata) -> u32 {
    if meta.is_dir() { 0o755 } else { 0o644 }
}

/// Recursively copy `src` into `dest`, creating `dest`. Returns bytes copied.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<u64> {
    std::fs::create_dir_all(dest).map_err(|e| HeadwayError::io(dest, e))?;
    let mut copied = 0;
    for rel in sorted_entries(src)? {
        let from = src.join(&rel);
        let to = dest.join(&rel);
        if from.is_dir() {
            std::fs::create_dir_all(&to).map_err(|e| HeadwayError::io(&to, e))?;
        } else {
            copied += std::fs::copy(&from, &to).map_err(|e| HeadwayError::io(&from, e))?;
        }
    }
    Ok(copied)
}

/// Every path under `root`, relative to it, in lexicographic order.
/// Directory symlinks are listed but not followed.
pub(crate) fn sorted_entries(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![PathBuf::new()];

    while let Some(rel) = stack.pop() {
        let dir = root.join(&rel);
        let read = std::fs::read_dir(&dir).map_err(|e| HeadwayError::io(&dir, e))?;
        for entry in read {
            let entry = entry.map_err(|e| HeadwayError::io(&dir, e))?;
            let child = rel.join(entry.file_name());
            let file_type = entry
                .file_type()
                .map_err(|e| HeadwayError::io(entry.path(), e))?;
            if file_type.is_dir() {
                stack.push(child.clone());
            }
            out.push(child);
        }
    }

    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn sample_tree(root: &Path) {
        std::fs::create_dir_all(root.join("tiles/0/1")).unwrap();
        std::fs::write(root.join("tiles/0/1/2.gph"), b"graph tile").unwrap();
        std::fs::write(root.join("valhalla.json"), b"{}").unwrap();
        std::fs::write(root.join("timezones.sqlite"), b"tz").unwrap();
    }

    fn list_archive(path: &Path) -> Vec<String> {
        let file = File::open(path).unwrap();
        let decoder = zstd::stream::Decoder::new(file).unwrap();
        let mut archive = tar::Archive::new(decoder);
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn from_parts_rejects_both() {
        let err = Artifact::from_parts(Some("a".into()), Some("b".into())).unwrap_err();
        assert!(err.is_invariant());
    }

    #[test]
    fn from_parts_rejects_neither() {
        let err = Artifact::from_parts(None, None).unwrap_err();
        assert!(matches!(err, HeadwayError::Invariant(_)));
    }

    #[test]
    fn from_parts_accepts_exactly_one() {
        assert_eq!(
            Artifact::from_parts(Some("a".into()), None).unwrap(),
            Artifact::File("a".into())
        );
        assert!(
            Artifact::from_parts(None, Some("d".into()))
                .unwrap()
                .is_directory()
        );
    }

    #[test]
    fn compress_file_is_single_zstd_stream() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("graph.obj");
        std::fs::write(&src, b"serialized graph").unwrap();
        let dest = dir.path().join("graph.obj.zst");

        Artifact::File(src).compress_to(&dest).unwrap();

        let mut out = Vec::new();
        zstd::stream::Decoder::new(File::open(&dest).unwrap())
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"serialized graph");
    }

    #[test]
    fn compress_directory_lists_sorted_entries() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tiles");
        sample_tree(&src);
        let dest = dir.path().join("out.tar.zst");

        Artifact::Directory(src).compress_to(&dest).unwrap();

        let names = list_archive(&dest);
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names.iter().any(|n| n == "tiles/0/1/2.gph"));
        assert!(names.iter().any(|n| n == "valhalla.json"));
    }

    #[test]
    fn compress_directory_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        sample_tree(&a);
        // Same tree, different creation order.
        std::fs::create_dir_all(&b).unwrap();
        std::fs::write(b.join("timezones.sqlite"), b"tz").unwrap();
        std::fs::write(b.join("valhalla.json"), b"{}").unwrap();
        std::fs::create_dir_all(b.join("tiles/0/1")).unwrap();
        std::fs::write(b.join("tiles/0/1/2.gph"), b"graph tile").unwrap();

        let out_a = dir.path().join("a.tar.zst");
        let out_b = dir.path().join("b.tar.zst");
        Artifact::Directory(a).compress_to(&out_a).unwrap();
        Artifact::Directory(b).compress_to(&out_b).unwrap();

        assert_eq!(std::fs::read(out_a).unwrap(), std::fs::read(out_b).unwrap());
    }

    #[test]
    fn copy_tree_mirrors_layout() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        sample_tree(&src);
        let dest = dir.path().join("dest");

        let bytes = copy_tree(&src, &dest).unwrap();

        assert_eq!(bytes, ("graph tile".len() + 2 + 2) as u64);
        assert_eq!(std::fs::read(dest.join("tiles/0/1/2.gph")).unwrap(), b"graph tile");
    }

    #[test]
    fn compress_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Artifact::File(dir.path().join("absent"))
            .compress_to(&dir.path().join("absent.zst"))
            .unwrap_err();
        assert!(matches!(err, HeadwayError::Io { .. }));
    }

    #[test]
    fn failed_compression_keeps_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("graph.tar.zst");
        std::fs::write(&dest, "previous bundle").unwrap();

        Artifact::Directory(dir.path().join("absent"))
            .compress_to(&dest)
            .unwrap_err();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "previous bundle");
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["graph.tar.zst"]);
    }
}
