//! Build orchestration for Headway regional map bundles.
//!
//! Ties extraction, tile and routing builds, geocoding imports, terrain
//! assets, and per-zone transit builds into end-to-end workflows
//! (see [`pipeline::build`] and [`pipeline::build_transit_bundle`]).

pub mod context;
pub mod elevation;
pub mod geocoding;
pub mod pipeline;
pub mod routing;
pub mod terrain;
pub mod tiles;
pub mod transit;

pub use context::BuildContext;
pub use pipeline::{
    BuildRequest, BuildResult, ProgressReporter, SilentProgress, build, build_area,
    build_transit_bundle, prepare_context,
};
