//! Geocoding: config generation, the ordered index import, and placeholder
//! data.
//!
//! The gazetteer is downloaded once per run and handed by reference to
//! every consumer (gazetteer, address-point, OSM and polyline imports, and
//! the placeholder build).

pub mod config;
pub mod importer;
pub mod placeholder;

use std::future::Future;
use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use headway_shared::Result;
use headway_tools::Invocation;

use crate::context::BuildContext;

pub use config::{GeocodingConfig, generate_config};
pub use importer::{ImportStage, ImportState, build_index, index_cache_key, plan};
pub use placeholder::prepare_placeholder;

/// Downloaded gazetteer data, shared read-only by later stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gazetteer {
    dir: PathBuf,
}

impl Gazetteer {
    /// Use an existing gazetteer directory.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Download the gazetteer for the area described by `config`.
#[instrument(skip_all, fields(area = %ctx.area_name()))]
pub async fn download_gazetteer(ctx: &BuildContext, config: &GeocodingConfig) -> Result<Gazetteer> {
    let dir = ctx.scratch("whosonfirst")?;
    let invocation = Invocation::new("download gazetteer", &ctx.images().geocoding_gazetteer)
        .shell("./bin/download")
        .mount_ro(config.path(), "/code/pelias.json")
        .mount_rw(&dir, "/data/whosonfirst")
        .produces_dir(&dir);
    ctx.runner().run(&invocation).await?;
    Ok(Gazetteer { dir })
}

/// Everything the geocoding branch contributes to the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeocodingOutputs {
    pub config: GeocodingConfig,
    /// Snapshot of the index storage.
    pub index: PathBuf,
    pub placeholder: PathBuf,
}

/// Generate the config, fetch the gazetteer once, then run the index import
/// and the placeholder build side by side.
#[instrument(skip_all, fields(area = %ctx.area_name()))]
pub async fn build_geocoding<P>(ctx: &BuildContext, polylines: P) -> Result<GeocodingOutputs>
where
    P: Future<Output = Result<PathBuf>>,
{
    let config = generate_config(ctx).await?;
    let gazetteer = download_gazetteer(ctx, &config).await?;

    let (index, placeholder) = tokio::try_join!(
        build_index(ctx, &config, &gazetteer, polylines),
        prepare_placeholder(ctx, &config, &gazetteer),
    )?;

    info!("geocoding outputs ready");
    Ok(GeocodingOutputs {
        config,
        index,
        placeholder,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::fixture;
    use headway_shared::CountryFilter;
    use headway_tools::testing::ScriptedRunner;

    #[tokio::test]
    async fn gazetteer_downloaded_once_per_run() {
        let fx = fixture(
            ScriptedRunner::new().with_file_content(
                "geocoding config",
                r#"{"imports": {"openaddresses": {}}}"#,
            ),
            CountryFilter::Unfiltered,
        );
        let edges = fx.dir.path().join("edges.0sv");
        std::fs::write(&edges, "e").unwrap();

        let out = build_geocoding(&fx.ctx, async { Ok(edges) }).await.unwrap();

        assert!(out.config.address_points());
        assert_eq!(fx.runner.invocations_matching("download gazetteer").len(), 1);
        assert_eq!(
            fx.runner.invocations_matching("import address points").len(),
            1
        );
        assert!(out.index.is_dir());
        assert!(out.placeholder.is_dir());
    }

    #[tokio::test]
    async fn config_failure_skips_import() {
        let fx = fixture(
            ScriptedRunner::new().fail_stage("geocoding config", "yarn exploded"),
            CountryFilter::Unfiltered,
        );
        let err = build_geocoding(&fx.ctx, async { Ok(PathBuf::new()) })
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some("geocoding config"));
        assert!(fx.runner.services_started().is_empty());
    }
}
