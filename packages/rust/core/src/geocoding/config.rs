//! Geocoding importer config generation.
//!
//! The generator is a node script in the services checkout. Its output is
//! parsed once here and the import plan reads structured flags from it.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, instrument};

use headway_shared::{HeadwayError, Result};
use headway_tools::{Invocation, shell_quote};

use crate::context::BuildContext;

const GENERATOR_DIR: &str = "pelias/generate_config";
const CONFIG_FILE: &str = "pelias.json";
/// Area reference table the generator reads, relative to the services root.
const AREAS_FILE: &str = "areas.csv";
const AREAS_MOUNT: &str = "/areas.csv";

/// A generated importer config plus what it enables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeocodingConfig {
    path: PathBuf,
    address_points: bool,
}

impl GeocodingConfig {
    /// Read a generated config from disk.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| HeadwayError::io(&path, e))?;
        let value: Value = serde_json::from_str(&text).map_err(|e| {
            HeadwayError::tool(
                "geocoding config",
                format!("generated config is not valid JSON: {e}"),
            )
        })?;
        let address_points = declares_address_points(&value);
        debug!(address_points, "parsed geocoding config");
        Ok(Self {
            path,
            address_points,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the config includes an address-points import section.
    pub fn address_points(&self) -> bool {
        self.address_points
    }
}

fn declares_address_points(config: &Value) -> bool {
    config
        .pointer("/imports/openaddresses")
        .is_some_and(|section| !section.is_null())
}

/// Generator shell script: build the generator next to the area table, then
/// write the config.
fn generate_script(area: &str, countries: &str) -> String {
    format!(
        "cp -r /generate_config /build && cp {AREAS_MOUNT} /build/{AREAS_FILE} && cd /build \
         && yarn install && yarn build \
         && bin/generate-pelias-config {AREAS_FILE} {} {} > /out/{CONFIG_FILE}",
        shell_quote(area),
        shell_quote(countries),
    )
}

/// Generate `pelias.json` for the context's area and country filter.
#[instrument(skip_all, fields(area = %ctx.area_name(), countries = %ctx.countries().as_arg()))]
pub async fn generate_config(ctx: &BuildContext) -> Result<GeocodingConfig> {
    let generator = ctx.require_service_path(GENERATOR_DIR)?;
    let areas = ctx.require_service_path(AREAS_FILE)?;
    let out = ctx.scratch("geocoding-config")?;
    let path = out.join(CONFIG_FILE);

    let invocation = Invocation::new("geocoding config", &ctx.images().node)
        .shell(generate_script(ctx.area_name(), &ctx.countries().as_arg()))
        .mount_ro(generator, "/generate_config")
        .mount_ro(areas, AREAS_MOUNT)
        .mount_rw(&out, "/out")
        .produces_file(&path);
    ctx.runner().run(&invocation).await?;

    let config = GeocodingConfig::load(path)?;
    info!(address_points = config.address_points(), "geocoding config generated");
    Ok(config)
}
