//! Bounding boxes and the area → bbox reference table.
//!
//! Downstream tools disagree on delimiters, so a [`Bbox`] serializes to both a
//! comma-joined and a space-joined form. [`Bbox::parse`] tokenizes on
//! whitespace and commas, so either form parses back to the same value.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{HeadwayError, Result};

/// Axis-aligned bounding box: `left bottom right top`.
///
/// Coordinate ordering (`left <= right`, `bottom <= top`) is not enforced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Bbox {
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self {
            left,
            bottom,
            right,
            top,
        }
    }

    /// Parse four numeric tokens separated by whitespace (or commas).
    pub fn parse(text: &str) -> Result<Self> {
        let tokens: Vec<&str> = text
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .collect();

        if tokens.len() != 4 {
            return Err(HeadwayError::malformed_bbox(
                text,
                format!("expected 4 numbers, found {}", tokens.len()),
            ));
        }

        let mut coords = [0.0_f64; 4];
        for (slot, (token, label)) in coords
            .iter_mut()
            .zip(tokens.iter().zip(["left", "bottom", "right", "top"]))
        {
            *slot = token.parse::<f64>().map_err(|e| {
                HeadwayError::malformed_bbox(text, format!("failed to parse {label} '{token}': {e}"))
            })?;
        }

        let [left, bottom, right, top] = coords;
        Ok(Self::new(left, bottom, right, top))
    }

    /// `left,bottom,right,top`, as taken by clipping and elevation tools.
    pub fn to_comma_separated(&self) -> String {
        format!("{},{},{},{}", self.left, self.bottom, self.right, self.top)
    }

    /// `left bottom right top`, as stored in the reference table.
    pub fn to_space_separated(&self) -> String {
        format!("{} {} {} {}", self.left, self.bottom, self.right, self.top)
    }

    /// Smallest box covering both `self` and `other`.
    pub fn union(&self, other: &Bbox) -> Bbox {
        Bbox::new(
            self.left.min(other.left),
            self.bottom.min(other.bottom),
            self.right.max(other.right),
            self.top.max(other.top),
        )
    }
}

impl fmt::Display for Bbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_space_separated())
    }
}

impl FromStr for Bbox {
    type Err = HeadwayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Reference table
// ---------------------------------------------------------------------------

/// The `name:left bottom right top` reference table, one area per line.
#[derive(Debug, Clone, Default)]
pub struct BboxTable {
    content: String,
}

impl BboxTable {
    pub fn from_text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// Read the table from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| HeadwayError::io(path, e))?;
        Ok(Self { content })
    }

    /// Resolve `area` to its bbox. Exactly one line must name the area.
    pub fn resolve(&self, area: &str) -> Result<Bbox> {
        let matches: Vec<&str> = self
            .content
            .lines()
            .filter_map(|line| line.split_once(':'))
            .filter(|(name, _)| name.trim() == area)
            .map(|(_, bbox)| bbox)
            .collect();

        match matches.as_slice() {
            [bbox] => Bbox::parse(bbox),
            _ => Err(HeadwayError::AmbiguousOrMissingArea {
                area: area.to_string(),
                matches: matches.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
Seattle:-122.4 47.5 -122.2 47.7
Portland:-122.8 45.4 -122.5 45.6
";

    #[test]
    fn parse_space_form() {
        let bbox = Bbox::parse("-122.4 47.5 -122.2 47.7").unwrap();
        assert_eq!(bbox, Bbox::new(-122.4, 47.5, -122.2, 47.7));
    }

    #[test]
    fn parse_tolerates_extra_whitespace() {
        let bbox = Bbox::parse("  1\t2   3\n4 ").unwrap();
        assert_eq!(bbox, Bbox::new(1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn both_serializations_parse_back() {
        let samples = [
            Bbox::new(-122.4, 47.5, -122.2, 47.7),
            Bbox::new(-180.0, -90.0, 180.0, 90.0),
            Bbox::new(0.1 + 0.2, 1e-7, 13.000_000_1, -0.0),
        ];
        for bbox in samples {
            assert_eq!(Bbox::parse(&bbox.to_space_separated()).unwrap(), bbox);
            assert_eq!(Bbox::parse(&bbox.to_comma_separated()).unwrap(), bbox);
        }
    }

    #[test]
    fn comma_form_has_no_spaces() {
        let bbox = Bbox::new(-122.4, 47.5, -122.2, 47.7);
        assert_eq!(bbox.to_comma_separated(), "-122.4,47.5,-122.2,47.7");
    }

    #[test]
    fn parse_rejects_wrong_token_count() {
        let err = Bbox::parse("1 2 3").unwrap_err();
        assert!(matches!(err, HeadwayError::MalformedBbox { .. }));
        assert!(Bbox::parse("1 2 3 4 5").is_err());
        assert!(Bbox::parse("").is_err());
    }

    #[test]
    fn parse_rejects_non_numeric() {
        let err = Bbox::parse("1 2 three 4").unwrap_err();
        assert!(err.to_string().contains("right"));
    }

    #[test]
    fn ordering_is_not_validated() {
        let bbox = Bbox::parse("10 10 0 0").unwrap();
        assert!(bbox.left > bbox.right);
    }

    #[test]
    fn union_covers_both() {
        let a = Bbox::new(0.0, 0.0, 1.0, 1.0);
        let b = Bbox::new(-1.0, 0.5, 0.5, 2.0);
        assert_eq!(a.union(&b), Bbox::new(-1.0, 0.0, 1.0, 2.0));
    }

    #[test]
    fn resolve_unique_match() {
        let table = BboxTable::from_text(TABLE);
        let bbox = table.resolve("Seattle").unwrap();
        assert_eq!(bbox, Bbox::new(-122.4, 47.5, -122.2, 47.7));
    }

    #[test]
    fn resolve_fails_on_duplicate() {
        let table = BboxTable::from_text(format!("{TABLE}Seattle:-122.4 47.5 -122.2 47.7\n"));
        let err = table.resolve("Seattle").unwrap_err();
        assert!(matches!(
            err,
            HeadwayError::AmbiguousOrMissingArea { matches: 2, .. }
        ));
    }

    #[test]
    fn resolve_fails_on_missing() {
        let table = BboxTable::from_text(TABLE);
        let err = table.resolve("Boise").unwrap_err();
        assert!(matches!(
            err,
            HeadwayError::AmbiguousOrMissingArea { matches: 0, .. }
        ));
    }

    #[test]
    fn resolve_requires_exact_name() {
        let table = BboxTable::from_text("NotSeattle:0 0 1 1\n");
        assert!(table.resolve("Seattle").is_err());
    }

    #[test]
    fn resolve_reports_malformed_entry() {
        let table = BboxTable::from_text("Seattle:1 2 3\n");
        assert!(matches!(
            table.resolve("Seattle").unwrap_err(),
            HeadwayError::MalformedBbox { .. }
        ));
    }

    #[test]
    fn load_fixture_table() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../../fixtures/bboxes.csv");
        let table = BboxTable::load(&path).unwrap();
        assert!(table.resolve("Seattle").is_ok());
    }
}
