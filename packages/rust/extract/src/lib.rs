//! OpenStreetMap extracts: remote download, adoption of local files, and
//! bbox clipping through the external clipping tool.

pub mod export;
pub mod fetch;

pub use export::{ExportOrigin, OsmExport, clip};
pub use fetch::Fetcher;
