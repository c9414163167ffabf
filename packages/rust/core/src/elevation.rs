//! Elevation rasters for a bounding box.
//!
//! The routing builder downloads raw height tiles for the bbox; a raster
//! converter then turns them into GeoTIFFs the transit graph builder reads.

use std::path::PathBuf;

use tracing::{info, instrument};

use headway_shared::{Bbox, Result};
use headway_tools::Invocation;

use crate::context::BuildContext;

const CONVERTER: &str = "otp/dem-hgt-to-tif";

/// Fetch and convert elevation for `bbox`. Returns the GeoTIFF directory.
#[instrument(skip_all, fields(area = %ctx.area_name(), bbox = %bbox))]
pub async fn build_elevation(ctx: &BuildContext, bbox: &Bbox) -> Result<PathBuf> {
    let converter = ctx.require_service_path(CONVERTER)?;
    let hgts = ctx.scratch("elevation-hgts")?;
    let tifs = ctx.scratch("elevation-tifs")?;

    let download = Invocation::new("elevation download", &ctx.images().routing)
        .entrypoint("valhalla_build_elevation")
        .args([
            "--outdir".to_string(),
            "/elevation-hgts".to_string(),
            format!("--from-bbox={}", bbox.to_comma_separated()),
        ])
        .mount_rw(&hgts, "/elevation-hgts")
        .produces_dir(&hgts);
    ctx.runner().run(&download).await?;

    let convert = Invocation::new("elevation convert", &ctx.images().raster)
        .entrypoint("/dem-hgt-to-tif")
        .args(["/elevation-hgts", "/elevation-tifs"])
        .mount_ro(converter, "/dem-hgt-to-tif")
        .mount_ro(&hgts, "/elevation-hgts")
        .mount_rw(&tifs, "/elevation-tifs")
        .produces_dir(&tifs);
    ctx.runner().run(&convert).await?;

    info!(dir = %tifs.display(), "elevation rasters ready");
    Ok(tifs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::fixture;
    use headway_shared::CountryFilter;
    use headway_tools::testing::ScriptedRunner;

    #[tokio::test]
    async fn downloads_with_comma_bbox_then_converts() {
        let fx = fixture(ScriptedRunner::new(), CountryFilter::Unfiltered);
        let bbox = Bbox::new(-122.46, 47.48, -122.22, 47.74);

        let tifs = build_elevation(&fx.ctx, &bbox).await.unwrap();

        assert!(tifs.is_dir());
        assert_eq!(
            fx.runner.stages(),
            vec!["elevation download", "elevation convert"]
        );
        let download = &fx.runner.invocations_matching("download")[0];
        assert!(
            download
                .args
                .contains(&"--from-bbox=-122.46,47.48,-122.22,47.74".to_string())
        );
    }

    #[tokio::test]
    async fn missing_converter_is_config_error() {
        let fx = fixture(ScriptedRunner::new(), CountryFilter::Unfiltered);
        std::fs::remove_file(fx.ctx.service_path(CONVERTER)).unwrap();
        let err = build_elevation(&fx.ctx, &Bbox::new(0.0, 0.0, 1.0, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, headway_shared::HeadwayError::Config { .. }));
        assert!(fx.runner.stages().is_empty());
    }
}
