//! Transit routing graph build for one zone.

use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use headway_artifacts::copy_tree;
use headway_extract::OsmExport;
use headway_shared::{HeadwayError, Result};
use headway_tools::Invocation;

use super::gtfs::gtfs_archives;
use super::zone::GtfsZone;
use crate::context::BuildContext;

const GRAPH_HOME: &str = "/var/opentripplanner";
const GRAPH_FILE: &str = "graph.obj";
const BUILD_CONFIG_FILE: &str = "build-config.json";

/// Build and save the zone's graph from its export, GTFS archives,
/// elevation rasters, and build config (if any). Returns `graph.obj`.
#[instrument(skip_all, fields(zone = %zone.name()))]
pub async fn build_graph(
    ctx: &BuildContext,
    zone: &GtfsZone,
    export: &OsmExport,
    elevation: &Path,
) -> Result<PathBuf> {
    let home = ctx.scratch("otp")?;
    let staged = home.clone();
    let gtfs_dir = zone.gtfs_dir().to_path_buf();
    let elevation = elevation.to_path_buf();
    let build_config = zone.zone().otp_build_config().map(Path::to_path_buf);

    tokio::task::spawn_blocking(move || {
        stage_inputs(&staged, &gtfs_dir, &elevation, build_config.as_deref())
    })
    .await
    .map_err(|e| HeadwayError::invariant(format!("staging task failed: {e}")))??;

    let graph = home.join(GRAPH_FILE);
    let invocation = Invocation::new(format!("transit graph ({})", zone.name()), &ctx.images().transit_graph)
        .args(["--build", "--save"])
        .workdir(GRAPH_HOME)
        .mount_rw(&home, GRAPH_HOME)
        .mount_ro(export.path(), format!("{GRAPH_HOME}/data.osm.pbf"))
        .produces_file(&graph);
    ctx.runner().run(&invocation).await?;

    info!(graph = %graph.display(), "transit graph saved");
    Ok(graph)
}

/// Lay out the builder's working directory: GTFS archives and rasters side
/// by side, plus the build config when one applies.
fn stage_inputs(
    home: &Path,
    gtfs_dir: &Path,
    elevation: &Path,
    build_config: Option<&Path>,
) -> Result<()> {
    for archive in gtfs_archives(gtfs_dir)? {
        if let Some(name) = archive.file_name() {
            let dest = home.join(name);
            std::fs::copy(&archive, &dest).map_err(|e| HeadwayError::io(&archive, e))?;
        }
    }
    copy_tree(elevation, home)?;
    if let Some(config) = build_config {
        let dest = home.join(BUILD_CONFIG_FILE);
        std::fs::copy(config, &dest).map_err(|e| HeadwayError::io(config, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::fixture;
    use crate::transit::zone::TransitZone;
    use headway_shared::CountryFilter;
    use headway_tools::testing::ScriptedRunner;

    struct Inputs {
        zone: GtfsZone,
        elevation: PathBuf,
    }

    fn inputs(root: &Path, build_config: bool) -> Inputs {
        let gtfs = root.join("gtfs");
        std::fs::create_dir_all(&gtfs).unwrap();
        std::fs::write(gtfs.join("metro.zip"), "zip").unwrap();
        let elevation = root.join("tifs");
        std::fs::create_dir_all(&elevation).unwrap();
        std::fs::write(elevation.join("N47W123.tif"), "tif").unwrap();

        let mut zone = TransitZone::new("seattle", "k", root.join("seattle.gtfs_feeds.csv"));
        if build_config {
            let cfg = root.join("otp-build-config.json");
            std::fs::write(&cfg, r#"{"routingMode": "STREET_AND_TRANSIT"}"#).unwrap();
            zone = zone.with_otp_build_config(cfg);
        }
        Inputs {
            zone: zone.with_gtfs_dir(gtfs),
            elevation,
        }
    }

    #[tokio::test]
    async fn stages_gtfs_rasters_and_config() {
        let fx = fixture(ScriptedRunner::new(), CountryFilter::Unfiltered);
        let inputs = inputs(fx.dir.path(), true);

        let graph = build_graph(&fx.ctx, &inputs.zone, fx.ctx.export(), &inputs.elevation)
            .await
            .unwrap();

        let home = graph.parent().unwrap();
        assert!(home.join("metro.zip").is_file());
        assert!(home.join("N47W123.tif").is_file());
        assert!(home.join(BUILD_CONFIG_FILE).is_file());
        let inv = &fx.runner.invocations()[0];
        assert_eq!(inv.args, vec!["--build", "--save"]);
        assert_eq!(inv.stage, "transit graph (seattle)");
    }

    #[tokio::test]
    async fn no_build_config_without_override() {
        let fx = fixture(ScriptedRunner::new(), CountryFilter::Unfiltered);
        let inputs = inputs(fx.dir.path(), false);

        let graph = build_graph(&fx.ctx, &inputs.zone, fx.ctx.export(), &inputs.elevation)
            .await
            .unwrap();

        assert!(!graph.with_file_name(BUILD_CONFIG_FILE).exists());
    }
}
