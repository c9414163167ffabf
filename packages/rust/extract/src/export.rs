//! The OSM export model: download, adopt, clip.
//!
//! An [`OsmExport`] is a read-only handle to a `.osm.pbf` file. Clipping never
//! touches the source; it writes a new file and returns a new handle, so the
//! full-area export stays valid for tiling, routing, and other zones.

use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use headway_artifacts::file_digest;
use headway_shared::{Bbox, BuildSettings, HeadwayError, Result};
use headway_tools::{Invocation, ToolRunner};

use crate::fetch::Fetcher;

/// Container-side paths used by the clipping tool.
const CLIP_INPUT: &str = "/app/data.osm.pbf";
const CLIP_OUTPUT_DIR: &str = "/app/out";

/// Where an export came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportOrigin {
    Downloaded { url: String },
    Adopted,
    Clipped { bbox: Bbox },
}

/// Read-only handle to extract content on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct OsmExport {
    path: PathBuf,
    origin: ExportOrigin,
}

impl OsmExport {
    /// Wrap a caller-supplied extract. Only checks that it is a file.
    pub fn adopt(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(HeadwayError::validation(format!(
                "extract {} is not a file",
                path.display()
            )));
        }
        Ok(Self {
            path,
            origin: ExportOrigin::Adopted,
        })
    }

    /// Download the named area's extract into `dest`.
    #[instrument(skip_all, fields(area = %area))]
    pub async fn download(
        fetcher: &Fetcher,
        settings: &BuildSettings,
        area: &str,
        dest: &Path,
    ) -> Result<Self> {
        let url = settings.extract_url(area);
        info!(%url, "downloading extract");
        fetcher.fetch_to_file(&url, dest).await?;
        Ok(Self {
            path: dest.to_path_buf(),
            origin: ExportOrigin::Downloaded { url },
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn origin(&self) -> &ExportOrigin {
        &self.origin
    }

    /// Hex SHA-256 of the extract bytes, computed off the async runtime.
    pub async fn digest(&self) -> Result<String> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || file_digest(&path))
            .await
            .map_err(|e| HeadwayError::invariant(format!("digest task failed: {e}")))?
    }
}

/// Derive a new export scoped to `bbox`, written to `dest`.
///
/// The source file is mounted read-only and `dest` must differ from it.
/// Clipping-tool failures are fatal and not retried.
#[instrument(skip_all, fields(src = %export.path().display(), bbox = %bbox))]
pub async fn clip(
    runner: &dyn ToolRunner,
    image: &str,
    export: &OsmExport,
    bbox: &Bbox,
    dest: &Path,
) -> Result<OsmExport> {
    if dest == export.path() {
        return Err(HeadwayError::invariant(format!(
            "clip destination {} is the source extract",
            dest.display()
        )));
    }

    let invocation = clip_invocation(image, export.path(), bbox, dest)?;
    runner.run(&invocation).await?;

    info!(dest = %dest.display(), "clipped extract");
    Ok(OsmExport {
        path: dest.to_path_buf(),
        origin: ExportOrigin::Clipped { bbox: *bbox },
    })
}

fn clip_invocation(image: &str, src: &Path, bbox: &Bbox, dest: &Path) -> Result<Invocation> {
    let (dir, name) = match (dest.parent(), dest.file_name()) {
        (Some(dir), Some(name)) => (dir, name.to_string_lossy()),
        _ => {
            return Err(HeadwayError::validation(format!(
                "clip destination {} has no file name",
                dest.display()
            )));
        }
    };

    Ok(Invocation::new("clip extract", image)
        .entrypoint("osmium")
        .args([
            "extract".to_string(),
            "--bbox".to_string(),
            bbox.to_comma_separated(),
            "--overwrite".to_string(),
            "--output".to_string(),
            format!("{CLIP_OUTPUT_DIR}/{name}"),
            CLIP_INPUT.to_string(),
        ])
        .mount_ro(src, CLIP_INPUT)
        .mount_rw(dir, CLIP_OUTPUT_DIR)
        .produces_file(dest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use headway_shared::AppConfig;
    use headway_tools::testing::ScriptedRunner;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(dir: &Path) -> OsmExport {
        let path = dir.join("data.osm.pbf");
        std::fs::write(&path, b"full extract").unwrap();
        OsmExport::adopt(path).unwrap()
    }

    #[test]
    fn adopt_requires_a_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(OsmExport::adopt(dir.path()).is_err());
        let export = source(dir.path());
        assert_eq!(export.origin(), &ExportOrigin::Adopted);
    }

    #[tokio::test]
    async fn clip_uses_comma_bbox_and_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let export = source(dir.path());
        let runner = ScriptedRunner::new();
        let bbox = Bbox::new(-122.4, 47.5, -122.2, 47.7);
        let dest = dir.path().join("zones/seattle.osm.pbf");

        let clipped = clip(&runner, "osmium", &export, &bbox, &dest).await.unwrap();

        let inv = &runner.invocations()[0];
        assert!(inv.args.contains(&"-122.4,47.5,-122.2,47.7".to_string()));
        assert!(inv.args.contains(&"/app/out/seattle.osm.pbf".to_string()));
        assert!(inv.mounts.iter().any(|m| m.read_only && m.host == export.path()));
        assert_eq!(clipped.path(), dest);
        assert_eq!(clipped.origin(), &ExportOrigin::Clipped { bbox });
    }

    #[tokio::test]
    async fn clip_leaves_source_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let export = source(dir.path());
        let before = export.digest().await.unwrap();
        let runner = ScriptedRunner::new();

        clip(
            &runner,
            "osmium",
            &export,
            &Bbox::new(0.0, 0.0, 1.0, 1.0),
            &dir.path().join("clipped.osm.pbf"),
        )
        .await
        .unwrap();

        assert_eq!(export.digest().await.unwrap(), before);
        assert_eq!(
            std::fs::read(export.path()).unwrap(),
            b"full extract".to_vec()
        );
    }

    #[tokio::test]
    async fn clip_onto_source_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let export = source(dir.path());
        let runner = ScriptedRunner::new();
        let err = clip(
            &runner,
            "osmium",
            &export,
            &Bbox::new(0.0, 0.0, 1.0, 1.0),
            export.path(),
        )
        .await
        .unwrap_err();
        assert!(err.is_invariant());
        assert!(runner.invocations().is_empty());
    }

    #[tokio::test]
    async fn clip_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let export = source(dir.path());
        let runner = ScriptedRunner::new().fail_stage("clip", "malformed extract");
        let err = clip(
            &runner,
            "osmium",
            &export,
            &Bbox::new(0.0, 0.0, 1.0, 1.0),
            &dir.path().join("clipped.osm.pbf"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.stage(), Some("clip extract"));
        assert_eq!(runner.invocations().len(), 1);
    }

    #[tokio::test]
    async fn download_uses_area_template() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Seattle/Seattle.osm.pbf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"pbf".to_vec()))
            .mount(&server)
            .await;

        let mut settings = BuildSettings::from(&AppConfig::default());
        settings.sources.extract_url_template = format!("{}/{{area}}/{{area}}.osm.pbf", server.uri());

        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new("headway/1.0").unwrap();
        let export = OsmExport::download(&fetcher, &settings, "Seattle", &dir.path().join("data.osm.pbf"))
            .await
            .unwrap();

        assert!(matches!(export.origin(), ExportOrigin::Downloaded { .. }));
        assert_eq!(std::fs::read(export.path()).unwrap(), b"pbf");
    }

    #[tokio::test]
    async fn download_failure_is_download_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut settings = BuildSettings::from(&AppConfig::default());
        settings.sources.extract_url_template = format!("{}/{{area}}.osm.pbf", server.uri());

        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new("headway/1.0").unwrap();
        let err = OsmExport::download(&fetcher, &settings, "Nowhere", &dir.path().join("x.osm.pbf"))
            .await
            .unwrap_err();
        assert!(matches!(err, HeadwayError::Download(_)));
    }
}
