//! Application configuration for Headway builds.
//!
//! User config lives at `~/.headway/headway.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HeadwayError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "headway.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".headway";

// ---------------------------------------------------------------------------
// Config structs (matching headway.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Remote data sources.
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Container images for every external collaborator.
    #[serde(default)]
    pub images: ImagesConfig,

    /// Tool runtime settings.
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Transit partitioner settings.
    #[serde(default)]
    pub transit: TransitConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Where finished bundles are exported.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Scratch space for per-build working directories.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,

    /// Persistent caches (geocoding index volumes).
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Checkout of the Headway `services/` tree (scripts, reference tables).
    #[serde(default = "default_services_dir")]
    pub services_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            work_dir: default_work_dir(),
            cache_dir: default_cache_dir(),
            services_dir: default_services_dir(),
        }
    }
}

fn default_output_dir() -> String {
    "./data".into()
}
fn default_work_dir() -> String {
    "~/.headway/work".into()
}
fn default_cache_dir() -> String {
    "~/.headway/cache".into()
}
fn default_services_dir() -> String {
    "./services".into()
}

/// `[sources]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Extract download URL; `{area}` is replaced with the area name.
    #[serde(default = "default_extract_url")]
    pub extract_url_template: String,

    /// Root URL for the static terrain and landcover layers.
    #[serde(default = "default_terrain_root")]
    pub terrain_asset_root: String,

    /// Tar archive of tile-builder source fixtures.
    #[serde(default = "default_tile_sources")]
    pub tile_sources_url: String,

    /// Mobility database feed catalog (CSV).
    #[serde(default = "default_mobility_db")]
    pub mobility_db_url: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            extract_url_template: default_extract_url(),
            terrain_asset_root: default_terrain_root(),
            tile_sources_url: default_tile_sources(),
            mobility_db_url: default_mobility_db(),
        }
    }
}

fn default_extract_url() -> String {
    "https://download.bbbike.org/osm/bbbike/{area}/{area}.osm.pbf".into()
}
fn default_terrain_root() -> String {
    "https://github.com/headwaymaps/headway-data/raw/main/tiles/".into()
}
fn default_tile_sources() -> String {
    "https://data.maps.earth/planetiler_fixtures/sources.tar".into()
}
fn default_mobility_db() -> String {
    "https://storage.googleapis.com/storage/v1/b/mdb-csv/o/sources.csv?alt=media".into()
}

/// `[images]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagesConfig {
    #[serde(default = "default_tiles_image")]
    pub tiles: String,
    #[serde(default = "default_routing_image")]
    pub routing: String,
    /// Slim base with the clipping tool installed.
    #[serde(default = "default_clip_image")]
    pub clip: String,
    #[serde(default = "default_transit_graph_image")]
    pub transit_graph: String,
    #[serde(default = "default_raster_image")]
    pub raster: String,
    #[serde(default = "default_python_image")]
    pub python: String,
    #[serde(default = "default_rust_image")]
    pub rust: String,
    #[serde(default = "default_node_image")]
    pub node: String,
    #[serde(default = "default_index_image")]
    pub index_service: String,
    #[serde(default = "default_schema_image")]
    pub geocoding_schema: String,
    #[serde(default = "default_gazetteer_image")]
    pub geocoding_gazetteer: String,
    #[serde(default = "default_addresses_image")]
    pub geocoding_addresses: String,
    #[serde(default = "default_osm_importer_image")]
    pub geocoding_osm: String,
    #[serde(default = "default_polylines_image")]
    pub geocoding_polylines: String,
    #[serde(default = "default_placeholder_image")]
    pub geocoding_placeholder: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            tiles: default_tiles_image(),
            routing: default_routing_image(),
            clip: default_clip_image(),
            transit_graph: default_transit_graph_image(),
            raster: default_raster_image(),
            python: default_python_image(),
            rust: default_rust_image(),
            node: default_node_image(),
            index_service: default_index_image(),
            geocoding_schema: default_schema_image(),
            geocoding_gazetteer: default_gazetteer_image(),
            geocoding_addresses: default_addresses_image(),
            geocoding_osm: default_osm_importer_image(),
            geocoding_polylines: default_polylines_image(),
            geocoding_placeholder: default_placeholder_image(),
        }
    }
}

fn default_tiles_image() -> String {
    "ghcr.io/onthegomap/planetiler:0.7.0".into()
}
fn default_routing_image() -> String {
    "ghcr.io/valhalla/valhalla:latest".into()
}
fn default_clip_image() -> String {
    "stefda/osmium-tool:latest".into()
}
fn default_transit_graph_image() -> String {
    "opentripplanner/opentripplanner:2.7.0".into()
}
fn default_raster_image() -> String {
    "ghcr.io/osgeo/gdal:ubuntu-small-latest".into()
}
fn default_python_image() -> String {
    "python:3".into()
}
fn default_rust_image() -> String {
    "rust:bookworm".into()
}
fn default_node_image() -> String {
    "node:20-slim".into()
}
fn default_index_image() -> String {
    "pelias/elasticsearch:8.12.2-beta".into()
}
fn default_schema_image() -> String {
    "pelias/schema:master".into()
}
fn default_gazetteer_image() -> String {
    "pelias/whosonfirst:master".into()
}
fn default_addresses_image() -> String {
    "pelias/openaddresses:master".into()
}
fn default_osm_importer_image() -> String {
    "pelias/openstreetmap:master".into()
}
fn default_polylines_image() -> String {
    "pelias/polylines:master".into()
}
fn default_placeholder_image() -> String {
    "pelias/placeholder:master".into()
}

/// `[tools]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Container runtime binary (`docker` or `podman`).
    #[serde(default = "default_runtime")]
    pub container_runtime: String,

    /// Share of available memory handed to the tile builder.
    #[serde(default = "default_memory_percent")]
    pub memory_budget_percent: u8,

    /// JVM options for the transient index service.
    #[serde(default = "default_index_java_opts")]
    pub index_java_opts: String,

    /// User agent for remote downloads.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            container_runtime: default_runtime(),
            memory_budget_percent: default_memory_percent(),
            index_java_opts: default_index_java_opts(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_runtime() -> String {
    "docker".into()
}
fn default_memory_percent() -> u8 {
    75
}
fn default_index_java_opts() -> String {
    "-Xmx8g".into()
}
fn default_user_agent() -> String {
    "headway/1.0".into()
}

/// How transit zone outputs are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKeyMode {
    /// Monthly date bucket (`YYYY-MM`).
    #[default]
    Date,
    /// Digest of the zone's feed list and area name.
    Content,
}

/// `[transit]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitConfig {
    /// Clip each zone's extract to its GTFS bbox.
    #[serde(default = "default_true")]
    pub clip_to_gtfs: bool,

    #[serde(default)]
    pub cache_key: CacheKeyMode,

    /// Upper bound on zones built concurrently.
    #[serde(default = "default_max_parallel_zones")]
    pub max_parallel_zones: usize,

    /// Drop failed zones instead of failing the whole transit build.
    #[serde(default)]
    pub allow_partial: bool,
}

impl Default for TransitConfig {
    fn default() -> Self {
        Self {
            clip_to_gtfs: true,
            cache_key: CacheKeyMode::default(),
            max_parallel_zones: default_max_parallel_zones(),
            allow_partial: false,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_parallel_zones() -> usize {
    4
}

// ---------------------------------------------------------------------------
// Build settings (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime build settings: merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub services_dir: PathBuf,
    pub sources: SourcesConfig,
    pub images: ImagesConfig,
    pub container_runtime: String,
    pub memory_budget_percent: u8,
    pub index_java_opts: String,
    pub user_agent: String,
    pub transit: TransitConfig,
}

impl From<&AppConfig> for BuildSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            output_dir: expand_home(&config.defaults.output_dir),
            work_dir: expand_home(&config.defaults.work_dir),
            cache_dir: expand_home(&config.defaults.cache_dir),
            services_dir: expand_home(&config.defaults.services_dir),
            sources: config.sources.clone(),
            images: config.images.clone(),
            container_runtime: config.tools.container_runtime.clone(),
            memory_budget_percent: config.tools.memory_budget_percent,
            index_java_opts: config.tools.index_java_opts.clone(),
            user_agent: config.tools.user_agent.clone(),
            transit: config.transit.clone(),
        }
    }
}

impl BuildSettings {
    /// Extract download URL for `area`.
    pub fn extract_url(&self, area: &str) -> String {
        self.sources.extract_url_template.replace("{area}", area)
    }

    /// URL of a static terrain asset by file name.
    pub fn terrain_url(&self, file_name: &str) -> Result<url::Url> {
        let root = url::Url::parse(&self.sources.terrain_asset_root).map_err(|e| {
            HeadwayError::config(format!(
                "invalid terrain asset root '{}': {e}",
                self.sources.terrain_asset_root
            ))
        })?;
        root.join(file_name)
            .map_err(|e| HeadwayError::config(format!("invalid terrain asset '{file_name}': {e}")))
    }

    /// Check that the configured percent is usable.
    pub fn validate(&self) -> Result<()> {
        if self.memory_budget_percent == 0 || self.memory_budget_percent > 100 {
            return Err(HeadwayError::config(format!(
                "memory_budget_percent must be in 1..=100, got {}",
                self.memory_budget_percent
            )));
        }
        if self.transit.max_parallel_zones == 0 {
            return Err(HeadwayError::config("max_parallel_zones must be at least 1"));
        }
        Ok(())
    }
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.headway/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| HeadwayError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.headway/headway.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HeadwayError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HeadwayError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HeadwayError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HeadwayError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HeadwayError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
