//! Vector map tiles.
//!
//! Two tool calls: a helper reports the memory budget (a percentage of what
//! the container can see), then the tile renderer runs over the unclipped
//! export. Planet builds get a different flag profile because the defaults
//! run out of memory on whole-world input.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use headway_shared::{HeadwayError, Result};
use headway_tools::Invocation;

use crate::context::BuildContext;

const MEMORY_HELPER: &str = "tilebuilder/percent-of-available-memory";
const SOURCE_IN_CONTAINER: &str = "/data/data.osm.pbf";
const OUTPUT_FILE: &str = "output.mbtiles";

/// Ask the memory helper how much heap the renderer may use.
#[instrument(skip_all, fields(area = %ctx.area_name()))]
pub async fn memory_budget(ctx: &BuildContext) -> Result<String> {
    let helper = ctx.require_service_path(MEMORY_HELPER)?;
    let percent = ctx.settings().memory_budget_percent.to_string();

    let invocation = Invocation::new("memory budget", &ctx.images().tiles)
        .entrypoint("/percent-of-available-memory")
        .arg(percent)
        .mount_ro(helper, "/percent-of-available-memory");

    let output = ctx.runner().run(&invocation).await?;
    let budget = output.stdout.trim().to_string();
    if budget.is_empty() {
        return Err(HeadwayError::tool(
            "memory budget",
            "helper printed no budget",
        ));
    }
    debug!(%budget, "memory budget");
    Ok(budget)
}

/// Renderer arguments. The planet profile selects planet bounds, array-backed
/// node mapping, memory-mapped storage, and a tuned heap.
pub fn tile_args(planet: bool, budget: &str) -> Vec<String> {
    let mut args = vec![
        format!("--osm_path={SOURCE_IN_CONTAINER}"),
        "--force".to_string(),
    ];
    if planet {
        args.extend([
            "--bounds=planet".to_string(),
            "--nodemap-type=array".to_string(),
            "--storage=mmap".to_string(),
            format!("-Xmx{budget}"),
            "-XX:MaxHeapFreeRatio=40".to_string(),
        ]);
    }
    args
}

/// Build `<area>.mbtiles` from the context's export. Returns the tile file.
#[instrument(skip_all, fields(area = %ctx.area_name(), planet = ctx.is_planet()))]
pub async fn build_tiles(ctx: &BuildContext) -> Result<PathBuf> {
    let budget = memory_budget(ctx).await?;

    let data_dir = ctx.scratch("tiles")?;
    fetch_sources(ctx, &data_dir).await?;

    let output = data_dir.join(OUTPUT_FILE);
    let invocation = Invocation::new("build tiles", &ctx.images().tiles)
        .args(tile_args(ctx.is_planet(), &budget))
        .mount_rw(&data_dir, "/data")
        .mount_ro(ctx.export().path(), SOURCE_IN_CONTAINER)
        .produces_file(&output);

    ctx.runner().run(&invocation).await?;
    info!(output = %output.display(), "tiles built");
    Ok(output)
}

/// Fetch the renderer's source fixtures and unpack them into `<data>/sources`.
async fn fetch_sources(ctx: &BuildContext, data_dir: &Path) -> Result<()> {
    let archive = data_dir.join("sources.tar");
    ctx.fetcher()
        .fetch_to_file(&ctx.settings().sources.tile_sources_url, &archive)
        .await?;

    let dest = data_dir.join("sources");
    tokio::task::spawn_blocking(move || unpack(&archive, &dest))
        .await
        .map_err(|e| HeadwayError::invariant(format!("unpack task failed: {e}")))?
}

fn unpack(archive: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest).map_err(|e| HeadwayError::io(dest, e))?;
    let file = std::fs::File::open(archive).map_err(|e| HeadwayError::io(archive, e))?;
    tar::Archive::new(file)
        .unpack(dest)
        .map_err(|e| HeadwayError::io(dest, e))?;
    std::fs::remove_file(archive).map_err(|e| HeadwayError::io(archive, e))
}
