//! End-to-end builds: area → export → tiles, routing, geocoding, terrain →
//! bundle, and the separate transit entry point.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

use headway_artifacts::{Artifact, Bundle};
use headway_extract::{Fetcher, OsmExport};
use headway_shared::{Area, BuildSettings, CountryFilter, Result, names};
use headway_tools::ToolRunner;

use crate::context::{BuildContext, allocate_workdir};
use crate::geocoding::build_geocoding;
use crate::routing::{RoutingTiles, build_routing_tiles, export_polylines};
use crate::terrain::fetch_terrain;
use crate::tiles::build_tiles;
use crate::transit::build_transit;

/// What the operator asked for.
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    /// Area name; must be non-empty.
    pub area: String,
    /// Country filter list, or `ALL` for a planet-scale build.
    pub countries: Option<String>,
    /// Local extract to use instead of downloading one.
    pub pbf: Option<PathBuf>,
}

/// Result of a completed build.
#[derive(Debug)]
pub struct BuildResult {
    pub bundle: Bundle,
    /// Scratch directory holding every intermediate file.
    pub workdir: PathBuf,
    pub elapsed: Duration,
}

/// Progress callback for reporting build status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when an independent branch starts.
    fn stage_started(&self, stage: &str);
    /// Called when an independent branch finishes successfully.
    fn stage_finished(&self, stage: &str, elapsed: Duration);
    /// Called when the build completes.
    fn done(&self, result: &BuildResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn stage_started(&self, _stage: &str) {}
    fn stage_finished(&self, _stage: &str, _elapsed: Duration) {}
    fn done(&self, _result: &BuildResult) {}
}

/// Validate the request and obtain the export. Fails fast on an empty area
/// name, before any download or tool call.
#[instrument(skip_all, fields(area = %request.area))]
pub async fn prepare_context(
    request: &BuildRequest,
    settings: Arc<BuildSettings>,
    runner: Arc<dyn ToolRunner>,
) -> Result<BuildContext> {
    let area = Area::named(request.area.clone())?;
    settings.validate()?;
    let countries = CountryFilter::parse(request.countries.as_deref());
    let fetcher = Fetcher::new(&settings.user_agent)?;
    let workdir = allocate_workdir(&settings.work_dir, area.name())?;

    let export = match &request.pbf {
        Some(path) => {
            info!(pbf = %path.display(), "using local extract");
            OsmExport::adopt(path)?
        }
        None => {
            let dest = workdir.join(names::extract(area.name()));
            OsmExport::download(&fetcher, &settings, area.name(), &dest)
                .await
                .map_err(|e| e.in_stage("download extract"))?
        }
    };

    Ok(BuildContext::new(
        area, countries, export, settings, runner, fetcher, workdir,
    ))
}

/// Run one independent branch, attributing any failure to `stage`.
async fn branch<T>(
    stage: &'static str,
    progress: &dyn ProgressReporter,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    let start = Instant::now();
    progress.stage_started(stage);
    match work.await {
        Ok(value) => {
            progress.stage_finished(stage, start.elapsed());
            info!(stage, elapsed_ms = start.elapsed().as_millis() as u64, "stage finished");
            Ok(value)
        }
        Err(e) => {
            warn!(stage, error = %e, "stage failed");
            Err(e.in_stage(stage))
        }
    }
}

/// Build every area-wide artifact and collect them into one bundle.
///
/// Tiles, routing, geocoding and terrain share only the read-only export
/// and run concurrently. The first failure aborts the build; no partial
/// bundle is returned.
#[instrument(skip_all, fields(area = %ctx.area_name(), planet = ctx.is_planet()))]
pub async fn build_area(ctx: &BuildContext, progress: &dyn ProgressReporter) -> Result<Bundle> {
    progress.phase("Building area artifacts");

    // One routing build feeds both the routing bundle entry and the
    // polylines the geocoding import needs.
    let routing: OnceCell<RoutingTiles> = OnceCell::new();
    let routing_tiles = || routing.get_or_try_init(|| build_routing_tiles(ctx));

    let polylines = async {
        let tiles = routing_tiles().await?;
        export_polylines(ctx, tiles).await
    };

    let (tiles, routing_dir, geocoding, terrain) = tokio::try_join!(
        branch("tiles", progress, build_tiles(ctx)),
        branch("routing", progress, async {
            Ok(routing_tiles().await?.dir().to_path_buf())
        }),
        branch("geocoding", progress, build_geocoding(ctx, polylines)),
        branch("terrain", progress, fetch_terrain(ctx)),
    )?;

    progress.phase("Collecting bundle");
    let area = ctx.area_name();
    let mut bundle = Bundle::new();
    bundle.insert(
        names::extract(area),
        Artifact::File(ctx.export().path().to_path_buf()),
    )?;
    bundle.insert(names::tiles(area), Artifact::File(tiles))?;
    bundle.insert_compressed(names::routing(area), Artifact::Directory(routing_dir))?;
    bundle.insert(
        names::geocoding_config(area),
        Artifact::File(geocoding.config.path().to_path_buf()),
    )?;
    bundle.insert_compressed(
        names::geocoding_index(area),
        Artifact::Directory(geocoding.index),
    )?;
    bundle.insert_compressed(
        names::placeholder(area),
        Artifact::Directory(geocoding.placeholder),
    )?;
    bundle.insert(names::TERRAIN, Artifact::File(terrain.terrain))?;
    bundle.insert(names::LANDCOVER, Artifact::File(terrain.landcover))?;

    info!(entries = bundle.len(), "area bundle assembled");
    Ok(bundle)
}

/// Run the full area build.
pub async fn build(
    request: &BuildRequest,
    settings: Arc<BuildSettings>,
    runner: Arc<dyn ToolRunner>,
    progress: &dyn ProgressReporter,
) -> Result<BuildResult> {
    let start = Instant::now();
    progress.phase("Preparing extract");
    let ctx = prepare_context(request, settings, runner).await?;
    let bundle = build_area(&ctx, progress).await?;

    let result = BuildResult {
        bundle,
        workdir: ctx.workdir().to_path_buf(),
        elapsed: start.elapsed(),
    };
    progress.done(&result);
    Ok(result)
}

/// Run the transit build for every zone under `transit_config`.
pub async fn build_transit_bundle(
    request: &BuildRequest,
    transit_config: &Path,
    settings: Arc<BuildSettings>,
    runner: Arc<dyn ToolRunner>,
    progress: &dyn ProgressReporter,
) -> Result<BuildResult> {
    let start = Instant::now();
    progress.phase("Preparing extract");
    let ctx = prepare_context(request, settings, runner).await?;

    progress.phase("Building transit zones");
    let bundle = branch(
        "transit",
        progress,
        build_transit(&ctx, transit_config, Utc::now()),
    )
    .await?;

    let result = BuildResult {
        bundle,
        workdir: ctx.workdir().to_path_buf(),
        elapsed: start.elapsed(),
    };
    progress.done(&result);
    Ok(result)
}
