//! Static terrain and landcover layers: two fixed remote assets, no computation.

use std::path::PathBuf;

use tracing::{info, instrument};

use headway_shared::{Result, names};

use crate::context::BuildContext;

/// Downloaded terrain layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerrainLayers {
    pub terrain: PathBuf,
    pub landcover: PathBuf,
}

#[instrument(skip_all, fields(area = %ctx.area_name()))]
pub async fn fetch_terrain(ctx: &BuildContext) -> Result<TerrainLayers> {
    let dir = ctx.scratch("terrain")?;
    let terrain = dir.join(names::TERRAIN);
    let landcover = dir.join(names::LANDCOVER);

    let terrain_url = ctx.settings().terrain_url(names::TERRAIN)?;
    let landcover_url = ctx.settings().terrain_url(names::LANDCOVER)?;

    tokio::try_join!(
        ctx.fetcher().fetch_to_file(terrain_url.as_str(), &terrain),
        ctx.fetcher().fetch_to_file(landcover_url.as_str(), &landcover),
    )?;

    info!("terrain layers downloaded");
    Ok(TerrainLayers { terrain, landcover })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{fixture, with_settings};
    use headway_shared::CountryFilter;
    use headway_tools::testing::ScriptedRunner;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetches_both_layers() {
        let server = MockServer::start().await;
        for (name, body) in [("terrain.mbtiles", "hills"), ("landcover.mbtiles", "trees")] {
            Mock::given(method("GET"))
                .and(path(format!("/tiles/{name}")))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .mount(&server)
                .await;
        }

        let fx = fixture(ScriptedRunner::new(), CountryFilter::Unfiltered);
        let mut settings = fx.ctx.settings().clone();
        settings.sources.terrain_asset_root = format!("{}/tiles/", server.uri());
        let ctx = with_settings(&fx.ctx, settings);

        let layers = fetch_terrain(&ctx).await.unwrap();
        assert_eq!(std::fs::read_to_string(layers.terrain).unwrap(), "hills");
        assert_eq!(std::fs::read_to_string(layers.landcover).unwrap(), "trees");
        assert!(fx.runner.stages().is_empty());
    }

    #[tokio::test]
    async fn missing_asset_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fx = fixture(ScriptedRunner::new(), CountryFilter::Unfiltered);
        let mut settings = fx.ctx.settings().clone();
        settings.sources.terrain_asset_root = format!("{}/tiles/", server.uri());
        let ctx = with_settings(&fx.ctx, settings);

        let err = fetch_terrain(&ctx).await.unwrap_err();
        assert!(matches!(err, headway_shared::HeadwayError::Download(_)));
    }
}
