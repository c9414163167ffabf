//! Nearby feed enumeration: filter the mobility database down to feeds
//! overlapping an area's bbox, producing a ready-to-use feed list.

use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use headway_extract::Fetcher;
use headway_shared::{Bbox, BuildSettings, HeadwayError, Result};
use headway_tools::{Invocation, ToolRunner};

const CATALOG_FILE: &str = "sources.csv";
const OUTPUT_FILE: &str = "nearby_gtfs_feeds.csv";

/// Write the feed list for `bbox` to `dest`. `workdir` holds the catalog.
#[instrument(skip_all, fields(bbox = %bbox, dest = %dest.display()))]
pub async fn nearby_feeds(
    runner: &dyn ToolRunner,
    fetcher: &Fetcher,
    settings: &BuildSettings,
    bbox: &Bbox,
    workdir: &Path,
    dest: &Path,
) -> Result<PathBuf> {
    let service = settings.services_dir.join("gtfs");
    if !service.is_dir() {
        return Err(HeadwayError::config(format!(
            "services checkout is missing {}",
            service.display()
        )));
    }

    let catalog = workdir.join(CATALOG_FILE);
    fetcher
        .fetch_to_file(&settings.sources.mobility_db_url, &catalog)
        .await?;

    let out = workdir.join("nearby");
    let filtered = out.join(OUTPUT_FILE);
    let invocation = Invocation::new("filter nearby feeds", &settings.images.python)
        .shell(format!(
            "./filter_feeds.py --bbox='{}' < /input/{CATALOG_FILE} > /out/{OUTPUT_FILE}",
            bbox.to_space_separated()
        ))
        .workdir("/app")
        .mount_ro(service, "/app")
        .mount_ro(&catalog, format!("/input/{CATALOG_FILE}"))
        .mount_rw(&out, "/out")
        .produces_file(&filtered);
    runner.run(&invocation).await?;

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HeadwayError::io(parent, e))?;
    }
    std::fs::copy(&filtered, dest).map_err(|e| HeadwayError::io(&filtered, e))?;
    info!("nearby feeds written");
    Ok(dest.to_path_buf())
}
