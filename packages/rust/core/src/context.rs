//! Immutable build context threaded through every stage.
//!
//! A [`BuildContext`] is created once per build. Stages never mutate it;
//! per-zone and per-stage views are derived with [`BuildContext::scoped`]
//! and [`BuildContext::with_export`], which return new values.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use headway_extract::{Fetcher, OsmExport};
use headway_shared::{Area, BuildSettings, CountryFilter, HeadwayError, ImagesConfig, Result};
use headway_tools::ToolRunner;

/// Everything a stage needs to know about the build it belongs to.
#[derive(Clone)]
pub struct BuildContext {
    area: Area,
    countries: CountryFilter,
    export: OsmExport,
    settings: Arc<BuildSettings>,
    runner: Arc<dyn ToolRunner>,
    fetcher: Fetcher,
    workdir: PathBuf,
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("area", &self.area)
            .field("countries", &self.countries)
            .field("export", &self.export)
            .field("workdir", &self.workdir)
            .finish_non_exhaustive()
    }
}

impl BuildContext {
    pub fn new(
        area: Area,
        countries: CountryFilter,
        export: OsmExport,
        settings: Arc<BuildSettings>,
        runner: Arc<dyn ToolRunner>,
        fetcher: Fetcher,
        workdir: PathBuf,
    ) -> Self {
        Self {
            area,
            countries,
            export,
            settings,
            runner,
            fetcher,
            workdir,
        }
    }

    pub fn area(&self) -> &Area {
        &self.area
    }

    pub fn area_name(&self) -> &str {
        self.area.name()
    }

    pub fn countries(&self) -> &CountryFilter {
        &self.countries
    }

    /// Planet-scale builds swap in tool profiles that scale to the whole world.
    pub fn is_planet(&self) -> bool {
        self.countries.is_planet()
    }

    /// The shared, unclipped export.
    pub fn export(&self) -> &OsmExport {
        &self.export
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    pub fn images(&self) -> &ImagesConfig {
        &self.settings.images
    }

    pub fn runner(&self) -> &dyn ToolRunner {
        self.runner.as_ref()
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// A file or directory under the services checkout.
    pub fn service_path(&self, rel: &str) -> PathBuf {
        self.settings.services_dir.join(rel)
    }

    /// Like [`BuildContext::service_path`], but the path must exist.
    pub fn require_service_path(&self, rel: &str) -> Result<PathBuf> {
        let path = self.service_path(rel);
        if !path.exists() {
            return Err(HeadwayError::config(format!(
                "services checkout is missing {}",
                path.display()
            )));
        }
        Ok(path)
    }

    /// A fresh scratch directory under this context's workdir.
    pub fn scratch(&self, name: &str) -> Result<PathBuf> {
        let dir = self.workdir.join(name);
        std::fs::create_dir_all(&dir).map_err(|e| HeadwayError::io(&dir, e))?;
        debug!(dir = %dir.display(), "scratch directory");
        Ok(dir)
    }

    /// Derived context whose workdir is a subdirectory of this one.
    pub fn scoped(&self, sub: &str) -> Self {
        Self {
            workdir: self.workdir.join(sub),
            ..self.clone()
        }
    }

    /// Derived context that reads from a different export.
    pub fn with_export(&self, export: OsmExport) -> Self {
        Self {
            export,
            ..self.clone()
        }
    }
}

/// Allocate a unique working directory for one build of `area`.
pub fn allocate_workdir(root: &Path, area: &str) -> Result<PathBuf> {
    let dir = root.join(format!("{area}-{}", uuid::Uuid::now_v7().simple()));
    std::fs::create_dir_all(&dir).map_err(|e| HeadwayError::io(&dir, e))?;
    Ok(dir)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Context fixtures for stage tests.

    use super::*;
    use headway_shared::AppConfig;
    use headway_tools::testing::ScriptedRunner;

    pub(crate) struct Fixture {
        pub dir: tempfile::TempDir,
        pub runner: Arc<ScriptedRunner>,
        pub ctx: BuildContext,
    }

    /// A context over a fake extract and a minimal services checkout.
    pub(crate) fn fixture(runner: ScriptedRunner, countries: CountryFilter) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let services = dir.path().join("services");
        for sub in [
            "tilebuilder",
            "pelias/generate_config",
            "gtfs/gtfout",
            "otp",
        ] {
            std::fs::create_dir_all(services.join(sub)).unwrap();
        }
        std::fs::write(services.join("tilebuilder/percent-of-available-memory"), "").unwrap();
        std::fs::write(services.join("otp/dem-hgt-to-tif"), "").unwrap();
        std::fs::write(services.join("pelias/wait.sh"), "").unwrap();
        std::fs::write(services.join("areas.csv"), "Seattle,US\n").unwrap();

        let pbf = dir.path().join("data.osm.pbf");
        std::fs::write(&pbf, b"extract bytes").unwrap();

        let mut settings = BuildSettings::from(&AppConfig::default());
        settings.services_dir = services;
        settings.cache_dir = dir.path().join("cache");
        settings.work_dir = dir.path().join("work");

        let runner = Arc::new(runner);
        let ctx = BuildContext::new(
            Area::named("Seattle").unwrap(),
            countries,
            OsmExport::adopt(pbf).unwrap(),
            Arc::new(settings),
            runner.clone(),
            Fetcher::new("headway-test").unwrap(),
            dir.path().join("work/build"),
        );

        Fixture { dir, runner, ctx }
    }

    /// Same context, different runner.
    pub(crate) fn with_runner(ctx: &BuildContext, runner: Arc<ScriptedRunner>) -> BuildContext {
        BuildContext {
            runner,
            ..ctx.clone()
        }
    }

    /// Same context, different settings.
    pub(crate) fn with_settings(ctx: &BuildContext, settings: BuildSettings) -> BuildContext {
        BuildContext {
            settings: Arc::new(settings),
            ..ctx.clone()
        }
    }
}
