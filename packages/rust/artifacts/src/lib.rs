//! Build artifacts: the File/Directory sum type, compression, digests, and the
//! append-only output bundle.

pub mod artifact;
pub mod bundle;
pub mod digest;

pub use artifact::{Artifact, Packaging, copy_tree};
pub use bundle::{Bundle, BundleManifest, MANIFEST_FILE, ManifestEntry, read_manifest};
pub use digest::{content_digest, file_digest};
