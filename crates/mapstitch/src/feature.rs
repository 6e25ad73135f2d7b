//! GeoJSON-like feature document shared by the merge and geocoding stages.
//!
//! The document mirrors what the text-detection pipeline writes: a
//! `FeatureCollection` of Polygon features whose coordinates are
//! mosaic-pixel offsets and whose properties carry the recognized `text`
//! and an optional confidence `score`. Coordinates are kept as a raw JSON
//! value so that a collection containing the odd Point or LineString still
//! deserializes; the downstream stages decide what to do with those.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed polygon ring in mosaic-pixel space: `[x, y]` pairs, first vertex
/// repeated last.
pub type Ring = Vec<[f64; 2]>;

/// Why a geometry could not supply a usable polygon ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingIssue {
    /// Geometry type is not `Polygon`.
    NotAPolygon,
    /// No `coordinates` member (or JSON null).
    MissingCoordinates,
    /// `coordinates` present but not an array of `[x, y]` rings.
    MalformedCoordinates,
}

impl fmt::Display for RingIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RingIssue::NotAPolygon => "unsupported geometry type (only Polygon is handled)",
            RingIssue::MissingCoordinates => "geometry has no coordinates",
            RingIssue::MalformedCoordinates => "coordinates are not a list of [x, y] rings",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default = "feature_collection_type")]
    pub kind: String,
    #[serde(default)]
    pub features: Vec<Feature>,
}

fn feature_collection_type() -> String {
    "FeatureCollection".to_owned()
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: feature_collection_type(),
            features,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_type")]
    pub kind: String,
    pub geometry: Geometry,
    #[serde(default)]
    pub properties: Properties,
}

fn feature_type() -> String {
    "Feature".to_owned()
}

impl Feature {
    /// A Polygon feature from a single outer ring.
    pub fn polygon(outer: Ring, properties: Properties) -> Self {
        Self {
            kind: feature_type(),
            geometry: Geometry::polygon(outer),
            properties,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    /// Raw GeoJSON coordinates. For a Polygon this is a list of rings,
    /// the first being the outer boundary.
    #[serde(default)]
    pub coordinates: Value,
    /// Parallel geographic ring(s) in `[lon, lat]` degrees, added by the
    /// geocoding stage. The pixel `coordinates` are always retained.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latlon: Option<Vec<Ring>>,
}

impl Geometry {
    pub fn polygon(outer: Ring) -> Self {
        Self {
            kind: "Polygon".to_owned(),
            coordinates: rings_to_value(&[outer]),
            latlon: None,
        }
    }

    pub fn is_polygon(&self) -> bool {
        self.kind == "Polygon"
    }

    /// The outer ring of a Polygon geometry as pixel pairs.
    pub fn outer_ring(&self) -> Result<Ring, RingIssue> {
        if !self.is_polygon() {
            return Err(RingIssue::NotAPolygon);
        }
        if self.coordinates.is_null() {
            return Err(RingIssue::MissingCoordinates);
        }
        let rings: Vec<Ring> = serde_json::from_value(self.coordinates.clone())
            .map_err(|_| RingIssue::MalformedCoordinates)?;
        rings.into_iter().next().ok_or(RingIssue::MissingCoordinates)
    }
}

/// Build a coordinates value from rings without going through `to_value`
/// (which would fail on non-finite numbers instead of emitting null).
pub(crate) fn rings_to_value(rings: &[Ring]) -> Value {
    Value::Array(
        rings
            .iter()
            .map(|ring| {
                Value::Array(
                    ring.iter()
                        .map(|p| Value::Array(vec![Value::from(p[0]), Value::from(p[1])]))
                        .collect(),
                )
            })
            .collect(),
    )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    /// Recognized label text.
    #[serde(default)]
    pub text: String,
    /// Detection confidence in `[0, 1]`. Absent is a distinct state, not
    /// zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Anything else the detector wrote; copied through unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Properties {
    pub fn new(text: impl Into<String>, score: Option<f64>) -> Self {
        Self {
            text: text.into(),
            score,
            extra: Map::new(),
        }
    }
}
