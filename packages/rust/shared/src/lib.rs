//! Shared types, error model, and configuration for Headway builds.
//!
//! This crate is the foundation depended on by all other Headway crates.
//! It provides:
//! - [`HeadwayError`]: the unified error type
//! - Geography ([`Bbox`], [`BboxTable`], [`Area`], [`CountryFilter`])
//! - Configuration ([`AppConfig`], [`BuildSettings`], config loading)

pub mod bbox;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use bbox::{Bbox, BboxTable};
pub use config::{
    AppConfig, BuildSettings, CacheKeyMode, DefaultsConfig, ImagesConfig, SourcesConfig,
    ToolsConfig, TransitConfig, config_dir, config_file_path, expand_home, init_config,
    load_config, load_config_from,
};
pub use error::{HeadwayError, Result};
pub use types::{Area, CountryFilter, PLANET_SENTINEL, names};
