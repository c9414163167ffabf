//! Routing tiles and the edge export derived from them.
//!
//! The routing builder is driven in two phases: first generate its config
//! (pointing at the tile directory) and a timezone database, then build
//! tiles against the unclipped export. The edge export reuses a finished
//! tile directory.

use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use headway_shared::Result;
use headway_tools::Invocation;

use crate::context::BuildContext;

const TILES_IN_CONTAINER: &str = "/tiles";
const SOURCE_IN_CONTAINER: &str = "/data/osm/data.osm.pbf";
const POLYLINES_FILE: &str = "polylines.0sv";

/// Writes the builder config and the timezone database into `/tiles`.
pub const CONFIG_SCRIPT: &str = "valhalla_build_config \
--mjolnir-tile-dir /tiles \
--mjolnir-timezone /tiles/timezones.sqlite \
--mjolnir-admin /tiles/admins.sqlite \
> /tiles/valhalla.json \
&& valhalla_build_timezones > /tiles/timezones.sqlite";

/// A finished routing tile directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTiles {
    dir: PathBuf,
}

impl RoutingTiles {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> PathBuf {
        self.dir.join("valhalla.json")
    }
}

/// Build routing tiles for the context's export.
#[instrument(skip_all, fields(area = %ctx.area_name()))]
pub async fn build_routing_tiles(ctx: &BuildContext) -> Result<RoutingTiles> {
    let dir = ctx.scratch("valhalla")?;
    let image = &ctx.images().routing;

    let configure = Invocation::new("routing config", image)
        .shell(CONFIG_SCRIPT)
        .workdir(TILES_IN_CONTAINER)
        .mount_rw(&dir, TILES_IN_CONTAINER)
        .produces_file(dir.join("valhalla.json"))
        .produces_file(dir.join("timezones.sqlite"));
    ctx.runner().run(&configure).await?;

    let build = Invocation::new("routing tiles", image)
        .entrypoint("valhalla_build_tiles")
        .args(["-c", "/tiles/valhalla.json", SOURCE_IN_CONTAINER])
        .workdir(TILES_IN_CONTAINER)
        .mount_rw(&dir, TILES_IN_CONTAINER)
        .mount_ro(ctx.export().path(), SOURCE_IN_CONTAINER)
        .produces_dir(&dir);
    ctx.runner().run(&build).await?;

    info!(dir = %dir.display(), "routing tiles built");
    Ok(RoutingTiles { dir })
}

/// Export routing edges as polylines for the geocoding importer.
///
/// The tile directory is mounted read-only; the edges land in a separate
/// scratch directory so the tiles stay untouched for packaging.
#[instrument(skip_all, fields(area = %ctx.area_name()))]
pub async fn export_polylines(ctx: &BuildContext, tiles: &RoutingTiles) -> Result<PathBuf> {
    let out_dir = ctx.scratch("polylines")?;
    let output = out_dir.join(POLYLINES_FILE);

    let invocation = Invocation::new("routing edge export", &ctx.images().routing)
        .shell(format!(
            "valhalla_export_edges -c /tiles/valhalla.json > /out/{POLYLINES_FILE}"
        ))
        .workdir(TILES_IN_CONTAINER)
        .mount_ro(tiles.dir(), TILES_IN_CONTAINER)
        .mount_rw(&out_dir, "/out")
        .produces_file(&output);
    ctx.runner().run(&invocation).await?;

    Ok(output)
}
