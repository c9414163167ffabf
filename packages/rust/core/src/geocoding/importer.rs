//! Ordered import into a transient search index.
//!
//! Finished indexes are cached under a key built from the export's content
//! digest and the area name. On a miss the index service is started over a
//! per-run staging directory, every stage runs against it in order, and the
//! service is always stopped afterwards. Only a run that reaches
//! [`ImportState::Done`] promotes its staging directory to the keyed cache
//! entry. The returned artifact is a copy of the index storage, never the
//! running service.

use std::future::Future;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use headway_artifacts::copy_tree;
use headway_shared::{HeadwayError, Result};
use headway_tools::{Invocation, ServiceHandle, ServiceSpec, with_service};

use super::Gazetteer;
use super::config::GeocodingConfig;
use crate::context::BuildContext;

/// Hostname the generated config points the importers at.
pub const INDEX_SERVICE: &str = "pelias-elasticsearch";
const INDEX_DATA: &str = "/usr/share/elasticsearch/data";
/// Bumped when the index layout changes incompatibly.
const CACHE_SCHEMA: u32 = 3;

/// Progress of one import run. Ordered; a run only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ImportState {
    Init,
    SchemaCreated,
    GazetteerImported,
    AddressPointsImported,
    OsmImported,
    PolylinesImported,
    Done,
}

/// One step of the import. Each moves the run into one [`ImportState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ImportStage {
    CreateSchema,
    ImportGazetteer,
    ImportAddressPoints,
    ImportOsm,
    ImportPolylines,
}

impl ImportStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateSchema => "create index schema",
            Self::ImportGazetteer => "import gazetteer",
            Self::ImportAddressPoints => "import address points",
            Self::ImportOsm => "import openstreetmap",
            Self::ImportPolylines => "import polylines",
        }
    }

    /// State reached once this stage succeeds.
    pub fn reaches(self) -> ImportState {
        match self {
            Self::CreateSchema => ImportState::SchemaCreated,
            Self::ImportGazetteer => ImportState::GazetteerImported,
            Self::ImportAddressPoints => ImportState::AddressPointsImported,
            Self::ImportOsm => ImportState::OsmImported,
            Self::ImportPolylines => ImportState::PolylinesImported,
        }
    }
}

impl std::fmt::Display for ImportStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stages to run, in order. Address points run for planet builds and for
/// configs that declare an address-points import.
pub fn plan(config: &GeocodingConfig, planet: bool) -> Vec<ImportStage> {
    let mut stages = vec![ImportStage::CreateSchema, ImportStage::ImportGazetteer];
    if planet || config.address_points() {
        stages.push(ImportStage::ImportAddressPoints);
    }
    stages.extend([ImportStage::ImportOsm, ImportStage::ImportPolylines]);
    stages
}

/// Cache key for the index storage: content digest of the export plus the
/// area name. Equal inputs give equal keys.
pub fn index_cache_key(export_digest: &str, area: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(export_digest.as_bytes());
    hasher.update([0]);
    hasher.update(area.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    format!("{CACHE_SCHEMA}-content-{}", &hex[..16])
}

/// Host directory holding the finished index for this area and key.
pub fn index_cache_dir(cache_root: &Path, area: &str, key: &str) -> PathBuf {
    cache_root.join(cache_entry_name(area, key))
}

/// A fresh directory name for one run's import, next to the cache entry so
/// promotion is a same-filesystem rename.
fn index_staging_dir(cache_root: &Path, area: &str, key: &str) -> PathBuf {
    cache_root.join(format!(
        "{}.staging-{}",
        cache_entry_name(area, key),
        Uuid::now_v7().simple()
    ))
}

fn cache_entry_name(area: &str, key: &str) -> String {
    format!("{INDEX_SERVICE}-{}-{key}", path_component(area))
}

/// Area names are free text; keep them to a single path component. The key
/// already digests the raw name, so distinct areas never share an entry.
fn path_component(area: &str) -> String {
    area.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Builds the invocations for one run against a started service.
struct Importer<'a> {
    ctx: &'a BuildContext,
    config: &'a GeocodingConfig,
    gazetteer: &'a Gazetteer,
    service_dir: PathBuf,
}

impl Importer<'_> {
    /// Every importer waits for the index, sees the config, and reads the
    /// gazetteer (the schema stage ignores it).
    fn invocation(&self, stage: ImportStage, image: &str, command: &str, network: &str) -> Invocation {
        Invocation::new(stage.as_str(), image)
            .shell(format!("/pelias-service/wait.sh && {command}"))
            .network(network)
            .mount_ro(&self.service_dir, "/pelias-service")
            .mount_ro(self.config.path(), "/code/pelias.json")
            .mount_ro(self.gazetteer.dir(), "/data/whosonfirst")
    }

    async fn download_address_points(&self) -> Result<PathBuf> {
        let dir = self.ctx.scratch("openaddresses")?;
        let invocation =
            Invocation::new("download address points", &self.ctx.images().geocoding_addresses)
                .shell("./bin/download")
                .mount_ro(self.config.path(), "/code/pelias.json")
                .mount_rw(&dir, "/data/openaddresses")
                .produces_dir(&dir);
        self.ctx.runner().run(&invocation).await?;
        Ok(dir)
    }

    async fn run_stage<P>(
        &self,
        stage: ImportStage,
        handle: &ServiceHandle,
        polylines: &mut Option<P>,
    ) -> Result<()>
    where
        P: Future<Output = Result<PathBuf>>,
    {
        let images = self.ctx.images();
        let network = handle.network.as_str();
        let invocation = match stage {
            ImportStage::CreateSchema => {
                self.invocation(stage, &images.geocoding_schema, "./bin/create_index", network)
            }
            ImportStage::ImportGazetteer => {
                self.invocation(stage, &images.geocoding_gazetteer, "./bin/start", network)
            }
            ImportStage::ImportAddressPoints => {
                let addresses = self.download_address_points().await?;
                self.invocation(stage, &images.geocoding_addresses, "./bin/start", network)
                    .mount_ro(addresses, "/data/openaddresses")
            }
            ImportStage::ImportOsm => {
                self.invocation(stage, &images.geocoding_osm, "./bin/start", network)
                    .mount_ro(self.ctx.export().path(), "/data/openstreetmap/data.osm.pbf")
            }
            ImportStage::ImportPolylines => {
                let edges = match polylines.take() {
                    Some(pending) => pending.await?,
                    None => {
                        return Err(HeadwayError::invariant("polylines stage ran twice"));
                    }
                };
                self.invocation(stage, &images.geocoding_polylines, "./bin/start", network)
                    .mount_ro(edges, "/data/polylines/extract.0sv")
            }
        };
        self.ctx.runner().run(&invocation).await?;
        Ok(())
    }
}

/// Import into a cached index (or reuse one) and snapshot its storage.
///
/// `polylines` is awaited only when the polylines stage starts, so the
/// routing build that produces it can overlap the earlier stages. On a cache
/// hit it is never awaited.
#[instrument(skip_all, fields(area = %ctx.area_name()))]
pub async fn build_index<P>(
    ctx: &BuildContext,
    config: &GeocodingConfig,
    gazetteer: &Gazetteer,
    polylines: P,
) -> Result<PathBuf>
where
    P: Future<Output = Result<PathBuf>>,
{
    let digest = ctx.export().digest().await?;
    let key = index_cache_key(&digest, ctx.area_name());
    let cache_root = &ctx.settings().cache_dir;
    let cached = index_cache_dir(cache_root, ctx.area_name(), &key);

    if cached.is_dir() {
        info!(cache = %cached.display(), %key, "index cache hit, skipping import");
    } else {
        let staging = index_staging_dir(cache_root, ctx.area_name(), &key);
        std::fs::create_dir_all(&staging).map_err(|e| HeadwayError::io(&staging, e))?;
        info!(staging = %staging.display(), %key, "index cache miss");

        if let Err(e) = import_into(ctx, config, gazetteer, polylines, &staging).await {
            discard(&staging);
            return Err(e);
        }
        promote(&staging, &cached)?;
    }

    let snapshot = ctx.workdir().join("elasticsearch");
    let source = cached.clone();
    let dest = snapshot.clone();
    let bytes = tokio::task::spawn_blocking(move || copy_tree(&source, &dest))
        .await
        .map_err(|e| HeadwayError::invariant(format!("snapshot task failed: {e}")))??;
    info!(bytes, "index snapshot taken");
    Ok(snapshot)
}

/// Run every planned stage against a service backed by `data`.
async fn import_into<P>(
    ctx: &BuildContext,
    config: &GeocodingConfig,
    gazetteer: &Gazetteer,
    polylines: P,
    data: &Path,
) -> Result<()>
where
    P: Future<Output = Result<PathBuf>>,
{
    let stages = plan(config, ctx.is_planet());
    let importer = Importer {
        ctx,
        config,
        gazetteer,
        service_dir: ctx.require_service_path("pelias")?,
    };
    let spec = ServiceSpec::new(INDEX_SERVICE, &ctx.images().index_service)
        .env("ES_JAVA_OPTS", &ctx.settings().index_java_opts)
        .mount_rw(data, INDEX_DATA);

    let state = with_service(ctx.runner(), &spec, |handle| async move {
        let mut polylines = Some(polylines);
        let mut state = ImportState::Init;
        for stage in stages {
            let next = stage.reaches();
            if next <= state {
                return Err(HeadwayError::invariant(format!(
                    "import stage '{stage}' would move {state:?} back to {next:?}"
                )));
            }
            importer.run_stage(stage, &handle, &mut polylines).await?;
            debug!(?next, "import state");
            state = next;
        }
        Ok(ImportState::Done)
    })
    .await?;

    if state != ImportState::Done {
        return Err(HeadwayError::invariant(format!(
            "import finished in {state:?}"
        )));
    }
    info!(?state, "index import finished");
    Ok(())
}

/// Publish a completed staging directory as the cache entry. A concurrent
/// run that promoted first wins; ours is dropped.
fn promote(staging: &Path, cached: &Path) -> Result<()> {
    match std::fs::rename(staging, cached) {
        Ok(()) => Ok(()),
        Err(_) if cached.is_dir() => {
            info!(cache = %cached.display(), "index cache filled concurrently");
            discard(staging);
            Ok(())
        }
        Err(e) => {
            discard(staging);
            Err(HeadwayError::io(cached, e))
        }
    }
}

fn discard(staging: &Path) {
    if let Err(e) = std::fs::remove_dir_all(staging) {
        warn!(staging = %staging.display(), error = %e, "failed to remove staging index");
    }
}
