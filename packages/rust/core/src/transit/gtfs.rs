//! GTFS assembly and zone bounding boxes.
//!
//! The small GTFS helpers (`assume-bikes-allowed`, `gtfs-bbox`) are compiled
//! once per transit build from the services checkout and mounted into every
//! zone's invocations.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use headway_shared::{Bbox, HeadwayError, Result};
use headway_tools::Invocation;

use super::zone::{GtfsZone, TransitZone};
use crate::context::BuildContext;

const TOOLCHAIN_SOURCE: &str = "gtfs/gtfout";
const GTFS_SERVICE: &str = "gtfs";
const BIKES_TOOL: &str = "assume-bikes-allowed";
const BBOX_TOOL: &str = "gtfs-bbox";

/// Compiled GTFS helper binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtfsToolchain {
    pub assume_bikes_allowed: PathBuf,
    pub gtfs_bbox: PathBuf,
}

/// Build the GTFS helpers.
#[instrument(skip_all)]
pub async fn build_toolchain(ctx: &BuildContext) -> Result<GtfsToolchain> {
    let source = ctx.require_service_path(TOOLCHAIN_SOURCE)?;
    let out = ctx.scratch("gtfout")?;
    let assume_bikes_allowed = out.join(BIKES_TOOL);
    let gtfs_bbox = out.join(BBOX_TOOL);

    let invocation = Invocation::new("build gtfs tools", &ctx.images().rust)
        .shell(format!(
            "cp -r /src /gtfout && cd /gtfout && cargo build --release \
             && cp target/release/{BIKES_TOOL} target/release/{BBOX_TOOL} /out/"
        ))
        .mount_ro(source, "/src")
        .mount_rw(&out, "/out")
        .produces_file(&assume_bikes_allowed)
        .produces_file(&gtfs_bbox);
    ctx.runner().run(&invocation).await?;

    Ok(GtfsToolchain {
        assume_bikes_allowed,
        gtfs_bbox,
    })
}

/// Download every feed in the zone's list, apply the bicycle policy, and
/// assemble one GTFS directory.
#[instrument(skip_all, fields(zone = %zone.name()))]
pub async fn build_gtfs_dir(
    ctx: &BuildContext,
    toolchain: &GtfsToolchain,
    zone: TransitZone,
) -> Result<GtfsZone> {
    let service = ctx.require_service_path(GTFS_SERVICE)?;
    let out = ctx.scratch("gtfs")?;

    let invocation = Invocation::new(format!("gtfs build ({})", zone.name()), &ctx.images().python)
        .shell(
            "apt-get update -qq && apt-get install -y -qq zip > /dev/null \
             && pip install --quiet requests \
             && cp -r /gtfs-service/. /app && cd /app \
             && ./download_gtfs_feeds.py --output=downloaded < /input/gtfs_feeds.csv \
             && ./build_gtfs.sh --input downloaded --output /out",
        )
        .mount_ro(service, "/gtfs-service")
        .mount_ro(zone.feeds(), "/input/gtfs_feeds.csv")
        .mount_ro(
            &toolchain.assume_bikes_allowed,
            format!("/usr/local/bin/{BIKES_TOOL}"),
        )
        .mount_rw(&out, "/out")
        .produces_dir(&out);
    ctx.runner().run(&invocation).await?;

    info!(dir = %out.display(), "gtfs assembled");
    Ok(zone.with_gtfs_dir(out))
}

/// Union bbox over every GTFS archive in the zone's directory.
#[instrument(skip_all, fields(zone = %zone.name()))]
pub async fn zone_bbox(
    ctx: &BuildContext,
    toolchain: &GtfsToolchain,
    zone: &GtfsZone,
) -> Result<Bbox> {
    let stage = format!("gtfs bbox ({})", zone.name());
    let invocation = Invocation::new(&stage, &ctx.images().python)
        .shell(
            "mkdir -p /work/gtfs && cd /gtfs_zips \
             && for zip in *.zip; do python3 -m zipfile -e \"$zip\" \"/work/gtfs/${zip%.zip}\"; done \
             && gtfs-bbox /work/gtfs/*",
        )
        .mount_ro(zone.gtfs_dir(), "/gtfs_zips")
        .mount_ro(&toolchain.gtfs_bbox, format!("/usr/local/bin/{BBOX_TOOL}"));
    let output = ctx.runner().run(&invocation).await?;

    let bbox = Bbox::parse(output.stdout.trim()).map_err(|e| e.in_stage(stage))?;
    debug!(%bbox, "zone bbox");
    Ok(bbox)
}

/// GTFS archives in a zone directory, sorted.
pub fn gtfs_archives(dir: &Path) -> Result<Vec<PathBuf>> {
    let read = std::fs::read_dir(dir).map_err(|e| HeadwayError::io(dir, e))?;
    let mut archives = Vec::new();
    for entry in read {
        let path = entry.map_err(|e| HeadwayError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "zip") {
            archives.push(path);
        }
    }
    archives.sort();
    Ok(archives)
}
