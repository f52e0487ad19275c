//! EDR GeoJSON types for query responses.
//!
//! Data queries answer with an `EDR GeoJSON FeatureCollection Object`. The
//! collection is written incrementally by the query engine; these types
//! describe the individual features and are also used to read a response
//! back in tests and clients.
//!
//! See: <https://www.opengis.net/spec/ogcapi-edr-1/1.1/req/edr-geojson>

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opening of a streamed FeatureCollection, up to the start of the features array.
pub const FEATURE_COLLECTION_HEADER: &str = r#"{"type":"FeatureCollection","features":["#;

/// Close the features array and append the result counts.
pub fn feature_collection_footer(count: usize) -> String {
    format!(
        r#"],"numberOfReturned":{},"numberMatched":{}}}"#,
        count, count
    )
}

/// A complete GeoJSON FeatureCollection as produced by the data queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureCollection {
    /// Type identifier (always "FeatureCollection").
    #[serde(rename = "type")]
    pub type_: String,

    /// Array of features.
    pub features: Vec<Feature>,

    /// Number of features in this document.
    #[serde(rename = "numberOfReturned", skip_serializing_if = "Option::is_none")]
    pub number_returned: Option<usize>,

    /// Number of features matching the query.
    #[serde(rename = "numberMatched", skip_serializing_if = "Option::is_none")]
    pub number_matched: Option<usize>,
}

/// A GeoJSON Feature for EDR responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feature {
    /// Type identifier (always "Feature").
    #[serde(rename = "type")]
    pub type_: String,

    /// Envelope of the geometry as `[minx, miny, maxx, maxy]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,

    /// The geometry of this feature.
    pub geometry: Geometry,

    /// Attribute values.
    pub properties: Map<String, Value>,
}

impl Feature {
    /// Create a feature with no properties.
    pub fn new(geometry: Geometry) -> Self {
        Self {
            type_: "Feature".to_string(),
            bbox: None,
            geometry,
            properties: Map::new(),
        }
    }

    /// Set the bounding box.
    pub fn with_bbox(mut self, bbox: [f64; 4]) -> Self {
        self.bbox = Some(bbox);
        self
    }
}

/// GeoJSON geometry objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Geometry {
    Point {
        coordinates: [f64; 2],
    },
    MultiPoint {
        coordinates: Vec<[f64; 2]>,
    },
    LineString {
        coordinates: Vec<[f64; 2]>,
    },
    MultiLineString {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    /// First ring is the exterior, the rest are holes.
    Polygon {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<[f64; 2]>>>,
    },
    GeometryCollection {
        geometries: Vec<Geometry>,
    },
}

fn coord(c: &geo_types::Coord<f64>) -> [f64; 2] {
    [c.x, c.y]
}

fn line(ls: &geo_types::LineString<f64>) -> Vec<[f64; 2]> {
    ls.0.iter().map(coord).collect()
}

fn rings(polygon: &geo_types::Polygon<f64>) -> Vec<Vec<[f64; 2]>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(line)
        .collect()
}

impl From<&geo_types::Geometry<f64>> for Geometry {
    fn from(geometry: &geo_types::Geometry<f64>) -> Self {
        use geo_types::Geometry as G;

        match geometry {
            G::Point(p) => Geometry::Point {
                coordinates: coord(&p.0),
            },
            G::Line(l) => Geometry::LineString {
                coordinates: vec![coord(&l.start), coord(&l.end)],
            },
            G::LineString(ls) => Geometry::LineString {
                coordinates: line(ls),
            },
            G::Polygon(p) => Geometry::Polygon {
                coordinates: rings(p),
            },
            G::MultiPoint(mp) => Geometry::MultiPoint {
                coordinates: mp.0.iter().map(|p| coord(&p.0)).collect(),
            },
            G::MultiLineString(mls) => Geometry::MultiLineString {
                coordinates: mls.0.iter().map(line).collect(),
            },
            G::MultiPolygon(mp) => Geometry::MultiPolygon {
                coordinates: mp.0.iter().map(rings).collect(),
            },
            G::GeometryCollection(gc) => Geometry::GeometryCollection {
                geometries: gc.0.iter().map(Geometry::from).collect(),
            },
            G::Rect(r) => Geometry::Polygon {
                coordinates: rings(&r.to_polygon()),
            },
            G::Triangle(t) => Geometry::Polygon {
                coordinates: rings(&t.to_polygon()),
            },
        }
    }
}
