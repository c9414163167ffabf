//! Placeholder (coarse place lookup) dataset, prepared from the gazetteer.

use std::path::PathBuf;

use tracing::{info, instrument};

use headway_shared::Result;
use headway_tools::Invocation;

use super::Gazetteer;
use super::config::GeocodingConfig;
use crate::context::BuildContext;

#[instrument(skip_all, fields(area = %ctx.area_name()))]
pub async fn prepare_placeholder(
    ctx: &BuildContext,
    config: &GeocodingConfig,
    gazetteer: &Gazetteer,
) -> Result<PathBuf> {
    let out = ctx.scratch("placeholder")?;
    let invocation = Invocation::new("prepare placeholder", &ctx.images().geocoding_placeholder)
        .shell("./cmd/extract.sh && ./cmd/build.sh")
        .mount_ro(config.path(), "/code/pelias.json")
        .mount_ro(gazetteer.dir(), "/data/whosonfirst")
        .mount_rw(&out, "/data/placeholder")
        .produces_dir(&out);
    ctx.runner().run(&invocation).await?;

    info!(dir = %out.display(), "placeholder data ready");
    Ok(out)
}
