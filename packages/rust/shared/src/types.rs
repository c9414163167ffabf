//! Core domain types shared across Headway crates.
//!
//! [`Area`]: a named region with a resolved bbox.
//! [`CountryFilter`]: optional country list, or the planet-build sentinel.
//! [`names`]: fixed output file naming for the build bundle.

use std::fmt;

use crate::bbox::{Bbox, BboxTable};
use crate::error::{HeadwayError, Result};

// ---------------------------------------------------------------------------
// Area
// ---------------------------------------------------------------------------

/// A named geographic region. Immutable once resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Area {
    name: String,
    bbox: Option<Bbox>,
}

impl Area {
    /// An area known only by name. Fails fast on an empty name.
    pub fn named(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(HeadwayError::MissingArea);
        }
        Ok(Self { name, bbox: None })
    }

    /// Name the area and resolve its bbox against the reference table.
    pub fn resolve(name: impl Into<String>, table: &BboxTable) -> Result<Self> {
        let mut area = Self::named(name)?;
        area.bbox = Some(table.resolve(&area.name)?);
        Ok(area)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resolved bbox, if this area was resolved against a table.
    pub fn bbox(&self) -> Option<Bbox> {
        self.bbox
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ---------------------------------------------------------------------------
// Country filter
// ---------------------------------------------------------------------------

/// Sentinel that selects a planet-scale build.
pub const PLANET_SENTINEL: &str = "ALL";

/// Country scope handed to the geocoding config generator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CountryFilter {
    /// No filter: the generator derives countries from the area.
    #[default]
    Unfiltered,
    /// Explicit list of country codes.
    Only(Vec<String>),
    /// Whole-world build.
    Planet,
}

impl CountryFilter {
    /// Parse the operator-facing value: empty, `ALL`, or a comma-separated list.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::Unfiltered,
            Some(PLANET_SENTINEL) => Self::Planet,
            Some(list) => Self::Only(
                list.split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect(),
            ),
        }
    }

    pub fn is_planet(&self) -> bool {
        matches!(self, Self::Planet)
    }

    /// The argument form passed to the config generator.
    pub fn as_arg(&self) -> String {
        match self {
            Self::Unfiltered => String::new(),
            Self::Only(codes) => codes.join(","),
            Self::Planet => PLANET_SENTINEL.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Output naming
// ---------------------------------------------------------------------------

/// Well-known bundle entry names.
pub mod names {
    pub const TERRAIN: &str = "terrain.mbtiles";
    pub const LANDCOVER: &str = "landcover.mbtiles";

    pub fn extract(area: &str) -> String {
        format!("{area}.osm.pbf")
    }

    pub fn tiles(area: &str) -> String {
        format!("{area}.mbtiles")
    }

    pub fn routing(area: &str) -> String {
        format!("{area}.valhalla.tar.zst")
    }

    pub fn geocoding_config(area: &str) -> String {
        format!("{area}.pelias.json")
    }

    pub fn geocoding_index(area: &str) -> String {
        format!("{area}.elasticsearch.tar.zst")
    }

    pub fn placeholder(area: &str) -> String {
        format!("{area}.placeholder.tar.zst")
    }

    /// `<area>-<zone>-<cacheKey>`, the stem shared by a zone's outputs.
    pub fn zone_stem(area: &str, zone: &str, cache_key: &str) -> String {
        format!("{area}-{zone}-{cache_key}")
    }

    pub fn zone_gtfs(stem: &str) -> String {
        format!("{stem}.gtfs.tar.zst")
    }

    pub fn zone_graph(stem: &str) -> String {
        format!("{stem}.graph.obj.zst")
    }

    pub fn elevation(area: &str, cache_key: &str) -> String {
        format!("{area}-{cache_key}.elevation-tifs.tar.zst")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_area_name_fails_fast() {
        assert!(matches!(Area::named(""), Err(HeadwayError::MissingArea)));
        assert!(matches!(Area::named("   "), Err(HeadwayError::MissingArea)));
    }

    #[test]
    fn resolve_area_from_table() {
        let table = BboxTable::from_text("Seattle:-122.4 47.5 -122.2 47.7\n");
        let area = Area::resolve("Seattle", &table).unwrap();
        assert_eq!(area.name(), "Seattle");
        assert_eq!(area.bbox(), Some(Bbox::new(-122.4, 47.5, -122.2, 47.7)));
    }

    #[test]
    fn country_filter_parsing() {
        assert_eq!(CountryFilter::parse(None), CountryFilter::Unfiltered);
        assert_eq!(CountryFilter::parse(Some("")), CountryFilter::Unfiltered);
        assert_eq!(CountryFilter::parse(Some("ALL")), CountryFilter::Planet);
        assert_eq!(
            CountryFilter::parse(Some("US, CA")),
            CountryFilter::Only(vec!["US".into(), "CA".into()])
        );
        assert!(CountryFilter::parse(Some("ALL")).is_planet());
        assert!(!CountryFilter::parse(Some("US")).is_planet());
    }

    #[test]
    fn country_filter_arg_form() {
        assert_eq!(CountryFilter::Planet.as_arg(), "ALL");
        assert_eq!(
            CountryFilter::Only(vec!["US".into(), "CA".into()]).as_arg(),
            "US,CA"
        );
        assert_eq!(CountryFilter::Unfiltered.as_arg(), "");
    }

    #[test]
    fn fixed_output_names() {
        assert_eq!(names::extract("Seattle"), "Seattle.osm.pbf");
        assert_eq!(names::routing("Seattle"), "Seattle.valhalla.tar.zst");
        assert_eq!(names::geocoding_index("Seattle"), "Seattle.elasticsearch.tar.zst");
        let stem = names::zone_stem("Seattle", "metro", "2024-05-01");
        assert_eq!(stem, "Seattle-metro-2024-05-01");
        assert_eq!(names::zone_gtfs(&stem), "Seattle-metro-2024-05-01.gtfs.tar.zst");
        assert_eq!(names::zone_graph(&stem), "Seattle-metro-2024-05-01.graph.obj.zst");
        assert_eq!(
            names::elevation("Seattle", "2024-05-01"),
            "Seattle-2024-05-01.elevation-tifs.tar.zst"
        );
    }
}
