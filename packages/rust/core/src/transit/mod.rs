//! Transit zone partitioner.
//!
//! A transit config directory holds one feed list per zone under
//! `gtfs-feeds/`. Every zone is built independently (GTFS, bbox, optional
//! clip, elevation, graph) with a bounded number running at once, then the
//! results are merged by zone name into one bundle plus an area-wide
//! elevation archive.

pub mod cache_key;
pub mod feeds;
pub mod gtfs;
pub mod graph;
pub mod zone;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use headway_artifacts::{Artifact, Bundle, copy_tree};
use headway_extract::clip;
use headway_shared::{BuildSettings, HeadwayError, Result, names};

use crate::context::BuildContext;
use crate::elevation::build_elevation;

pub use feeds::nearby_feeds;
pub use gtfs::GtfsToolchain;
pub use zone::{FEED_LIST_SUFFIX, GtfsZone, TransitZone};

/// Feed lists live here, relative to the transit config directory.
pub const FEEDS_DIR: &str = "gtfs-feeds";
/// Graph-build override shared by every zone without its own.
pub const SHARED_BUILD_CONFIG: &str = "otp-build-config.json";

/// Everything one zone contributes to the merged bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneOutput {
    pub zone: String,
    pub stem: String,
    pub cache_key: String,
    pub gtfs_dir: PathBuf,
    pub graph: PathBuf,
    pub elevation: PathBuf,
}

/// Find every zone in `config_dir`, sorted by name.
///
/// Files in `gtfs-feeds/` that are not feed lists are ignored. A zone's own
/// `<zone>.otp-build-config.json` wins over the shared override.
pub fn discover_zones(
    config_dir: &Path,
    area: &str,
    settings: &BuildSettings,
    now: DateTime<Utc>,
) -> Result<Vec<TransitZone>> {
    let feeds_dir = config_dir.join(FEEDS_DIR);
    if !feeds_dir.is_dir() {
        return Err(HeadwayError::validation(format!(
            "transit config {} has no {FEEDS_DIR}/ directory",
            config_dir.display()
        )));
    }
    let shared_config = Some(config_dir.join(SHARED_BUILD_CONFIG)).filter(|p| p.is_file());

    let read = std::fs::read_dir(&feeds_dir).map_err(|e| HeadwayError::io(&feeds_dir, e))?;
    let mut zones = Vec::new();
    for entry in read {
        let path = entry.map_err(|e| HeadwayError::io(&feeds_dir, e))?.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(name) = zone::zone_name(file_name) else {
            continue;
        };
        if !path.is_file() {
            continue;
        }

        let feed_list = std::fs::read(&path).map_err(|e| HeadwayError::io(&path, e))?;
        let key = cache_key::zone_key(settings.transit.cache_key, &feed_list, area, now);
        let mut transit_zone = TransitZone::new(name, key, &path);

        let own_config = feeds_dir.join(format!("{name}{}", zone::ZONE_BUILD_CONFIG_SUFFIX));
        if own_config.is_file() {
            transit_zone = transit_zone.with_otp_build_config(own_config);
        } else if let Some(shared) = &shared_config {
            transit_zone = transit_zone.with_otp_build_config(shared);
        }
        zones.push(transit_zone);
    }

    zones.sort_by(|a, b| a.name().cmp(b.name()));
    Ok(zones)
}

/// Build one zone end to end. `ctx` is already scoped to the zone.
#[instrument(skip_all, fields(zone = %zone.name()))]
pub async fn build_zone(
    ctx: &BuildContext,
    toolchain: &GtfsToolchain,
    zone: TransitZone,
) -> Result<ZoneOutput> {
    let area = ctx.area_name().to_string();
    let stem = zone.stem(&area);
    let cache_key = zone.cache_key().to_string();

    let built = gtfs::build_gtfs_dir(ctx, toolchain, zone).await?;
    let bbox = gtfs::zone_bbox(ctx, toolchain, &built).await?;

    let built = if ctx.settings().transit.clip_to_gtfs {
        let dest = ctx.scratch("osm")?.join(names::extract(built.name()));
        let clipped = clip(ctx.runner(), &ctx.images().clip, ctx.export(), &bbox, &dest).await?;
        built.with_export(clipped)
    } else {
        built
    };
    let export = built.export().unwrap_or(ctx.export()).clone();

    let elevation = build_elevation(ctx, &bbox).await?;
    let graph = graph::build_graph(ctx, &built, &export, &elevation).await?;

    info!(%stem, "zone built");
    Ok(ZoneOutput {
        zone: built.name().to_string(),
        stem,
        cache_key,
        gtfs_dir: built.gtfs_dir().to_path_buf(),
        graph,
        elevation,
    })
}

/// Run every zone, at most `max_parallel_zones` at once. Each zone is its
/// own failure domain: all zones run to completion before results are
/// judged. Results come back sorted by zone name.
pub async fn run_zones(
    ctx: &BuildContext,
    toolchain: &GtfsToolchain,
    zones: Vec<TransitZone>,
) -> Vec<(String, Result<ZoneOutput>)> {
    let semaphore = Arc::new(Semaphore::new(ctx.settings().transit.max_parallel_zones.max(1)));
    let mut handles = Vec::new();

    for zone in zones {
        let name = zone.name().to_string();
        let zone_ctx = ctx.scoped(&format!("zones/{name}"));
        let toolchain = toolchain.clone();
        let sem = semaphore.clone();

        let handle = tokio::spawn(async move {
            let _permit = sem
                .acquire_owned()
                .await
                .map_err(|e| HeadwayError::invariant(format!("zone semaphore closed: {e}")))?;
            build_zone(&zone_ctx, &toolchain, zone).await
        });
        handles.push((name, handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(HeadwayError::invariant(format!("zone task failed: {e}"))),
        };
        results.push((name.clone(), result.map_err(|e| e.in_zone(name))));
    }
    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}

/// Apply the failure policy: any failed zone fails the whole run unless
/// `allow_partial` is set, in which case failed zones are dropped.
pub fn settle(
    results: Vec<(String, Result<ZoneOutput>)>,
    allow_partial: bool,
) -> Result<Vec<ZoneOutput>> {
    let mut built = Vec::new();
    let mut failed = Vec::new();
    for (zone, result) in results {
        match result {
            Ok(output) => built.push(output),
            Err(e) => {
                warn!(%zone, error = %e, "transit zone failed");
                failed.push(e);
            }
        }
    }

    if failed.is_empty() || (allow_partial && !built.is_empty()) {
        return Ok(built);
    }
    Err(HeadwayError::Zones { failed })
}

/// Merge zone outputs into one bundle: per-zone GTFS and graph archives plus
/// one elevation archive covering every zone.
pub async fn merge_zones(
    ctx: &BuildContext,
    outputs: &[ZoneOutput],
    now: DateTime<Utc>,
) -> Result<Bundle> {
    let mut bundle = Bundle::new();
    for output in outputs {
        bundle.insert_compressed(
            names::zone_gtfs(&output.stem),
            Artifact::Directory(output.gtfs_dir.clone()),
        )?;
        bundle.insert_compressed(
            names::zone_graph(&output.stem),
            Artifact::File(output.graph.clone()),
        )?;
    }

    let keys: Vec<&str> = outputs.iter().map(|o| o.cache_key.as_str()).collect();
    let aggregate = cache_key::aggregate_key(ctx.settings().transit.cache_key, &keys, now);

    let combined = ctx.scratch("elevation-all")?;
    let sources: Vec<PathBuf> = outputs.iter().map(|o| o.elevation.clone()).collect();
    let dest = combined.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        for source in &sources {
            copy_tree(source, &dest)?;
        }
        Ok(())
    })
    .await
    .map_err(|e| HeadwayError::invariant(format!("elevation merge task failed: {e}")))??;

    bundle.insert_compressed(
        names::elevation(ctx.area_name(), &aggregate),
        Artifact::Directory(combined),
    )?;
    Ok(bundle)
}

/// Partition, build, and merge every zone under `config_dir`.
#[instrument(skip_all, fields(area = %ctx.area_name(), config = %config_dir.display()))]
pub async fn build_transit(
    ctx: &BuildContext,
    config_dir: &Path,
    now: DateTime<Utc>,
) -> Result<Bundle> {
    let zones = discover_zones(config_dir, ctx.area_name(), ctx.settings(), now)?;
    if zones.is_empty() {
        warn!("no feed lists found, nothing to build");
        return Ok(Bundle::new());
    }
    info!(zones = zones.len(), "transit zones discovered");

    let toolchain = gtfs::build_toolchain(ctx).await?;
    let results = run_zones(ctx, &toolchain, zones).await;
    let outputs = settle(results, ctx.settings().transit.allow_partial)?;
    merge_zones(ctx, &outputs, now).await
}
