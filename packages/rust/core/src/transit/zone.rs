//! Transit zones and their build states.
//!
//! A zone starts as a [`TransitZone`] (feed list, cache key, optional build
//! config). Attaching its assembled GTFS directory turns it into a
//! [`GtfsZone`], the only type a graph can be built from.

use std::path::{Path, PathBuf};

use headway_extract::OsmExport;
use headway_shared::names;

/// Feed-list files are named `<zone>.gtfs_feeds.csv`.
pub const FEED_LIST_SUFFIX: &str = ".gtfs_feeds.csv";
/// Zone-specific graph-build override, next to the feed list.
pub const ZONE_BUILD_CONFIG_SUFFIX: &str = ".otp-build-config.json";

/// Zone name for a feed-list file name, or `None` if it is not a feed list.
pub fn zone_name(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(FEED_LIST_SUFFIX)
        .filter(|name| !name.is_empty())
}

/// A discovered zone before its GTFS directory exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitZone {
    name: String,
    cache_key: String,
    feeds: PathBuf,
    otp_build_config: Option<PathBuf>,
}

impl TransitZone {
    pub fn new(name: impl Into<String>, cache_key: impl Into<String>, feeds: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            cache_key: cache_key.into(),
            feeds: feeds.into(),
            otp_build_config: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// The feed-list CSV.
    pub fn feeds(&self) -> &Path {
        &self.feeds
    }

    pub fn otp_build_config(&self) -> Option<&Path> {
        self.otp_build_config.as_deref()
    }

    /// `<area>-<zone>-<cacheKey>`.
    pub fn stem(&self, area: &str) -> String {
        names::zone_stem(area, &self.name, &self.cache_key)
    }

    pub fn with_otp_build_config(self, path: impl Into<PathBuf>) -> Self {
        Self {
            otp_build_config: Some(path.into()),
            ..self
        }
    }

    pub fn with_gtfs_dir(self, gtfs_dir: impl Into<PathBuf>) -> GtfsZone {
        GtfsZone {
            zone: self,
            gtfs_dir: gtfs_dir.into(),
            export: None,
        }
    }
}

/// A zone whose merged GTFS directory has been built.
#[derive(Debug, Clone, PartialEq)]
pub struct GtfsZone {
    zone: TransitZone,
    gtfs_dir: PathBuf,
    export: Option<OsmExport>,
}

impl GtfsZone {
    pub fn zone(&self) -> &TransitZone {
        &self.zone
    }

    pub fn name(&self) -> &str {
        self.zone.name()
    }

    pub fn gtfs_dir(&self) -> &Path {
        &self.gtfs_dir
    }

    /// The zone's own clipped export, if one was derived.
    pub fn export(&self) -> Option<&OsmExport> {
        self.export.as_ref()
    }

    pub fn with_export(self, export: OsmExport) -> Self {
        Self {
            export: Some(export),
            ..self
        }
    }
}
