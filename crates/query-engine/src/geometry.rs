//! Spatial predicate construction.
//!
//! Each data query shape is reduced to a [`SpatialPredicate`]: either a plain
//! intersection with a query geometry, or an intersection with that geometry
//! buffered by a distance in meters. Buffering is geodetic and happens in
//! storage; this module only parses, converts units and validates.

use std::str::FromStr;

use geo::BoundingRect;
use geo_types::{Coord, Geometry, LineString, Polygon};
use geozero::{CoordDimensions, ToGeo, ToWkb};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// SRID assumed when the WKT carries none.
pub const DEFAULT_SRID: i32 = 4326;

/// Buffer applied to position and trajectory queries.
pub const POSITION_BUFFER_METERS: f64 = 100.0;

/// Distance units accepted by radius and corridor queries, as meters per unit.
pub const DISTANCE_UNITS: &[(&str, f64)] = &[
    ("nauticalmile", 1852.0),
    ("miles", 1609.34),
    ("sheppey", 1400.0),
    ("km", 1000.0),
    ("kilometres", 1000.0),
    ("furlong", 201.1675),
    ("chains", 20.11675),
    ("poles", 5.029),
    ("perch", 5.029),
    ("rod", 5.029),
    ("fathom", 1.8288),
    ("smoot", 1.702),
    ("m", 1.0),
    ("metres", 1.0),
    ("yard", 0.9144),
    ("foot", 0.3048),
    ("feet", 0.3048),
    ("hand", 0.1016),
    ("wiffle", 0.0889),
    ("inch", 0.0254),
    ("centimetre", 0.01),
    ("cm", 0.01),
    ("mm", 0.001),
    ("millimetre", 0.001),
    ("barleycorn", 0.00846667),
];

/// Convert a distance in `unit` to meters.
///
/// Units are matched case-insensitively against [`DISTANCE_UNITS`].
pub fn to_meters(distance: f64, unit: &str) -> EngineResult<f64> {
    let unit = unit.trim();
    DISTANCE_UNITS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(unit))
        .map(|(_, factor)| distance * factor)
        .ok_or_else(|| EngineError::UnknownUnit(unit.to_string()))
}

/// A parsed query geometry with its spatial reference.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryGeometry {
    pub geometry: Geometry<f64>,
    pub srid: i32,
}

impl QueryGeometry {
    pub fn new(geometry: Geometry<f64>, srid: i32) -> Self {
        Self { geometry, srid }
    }

    /// Parse WKT, optionally prefixed with an EWKT `SRID=<n>;` tag.
    pub fn parse(text: &str, default_srid: i32) -> EngineResult<Self> {
        let text = text.trim();
        let (srid, wkt_text) = split_srid(text)?;

        let wkt = wkt::Wkt::<f64>::from_str(wkt_text)
            .map_err(|e| EngineError::InvalidGeometry(format!("{}", e)))?;
        let geometry: Geometry<f64> = wkt
            .try_into()
            .map_err(|e: wkt::conversion::Error| EngineError::InvalidGeometry(format!("{:?}", e)))?;

        // Empty geometries have no extent and cannot be intersected.
        if geometry.bounding_rect().is_none() {
            return Err(EngineError::InvalidGeometry(format!(
                "empty geometry: {}",
                wkt_text
            )));
        }

        Ok(Self {
            geometry,
            srid: srid.unwrap_or(default_srid),
        })
    }

    /// Encode as well-known binary.
    pub fn to_wkb(&self) -> EngineResult<Vec<u8>> {
        self.geometry
            .to_wkb(CoordDimensions::xy())
            .map_err(|e| EngineError::InvalidGeometry(format!("WKB encoding failed: {}", e)))
    }
}

fn split_srid(text: &str) -> EngineResult<(Option<i32>, &str)> {
    let Some((prefix, rest)) = text.split_once(';') else {
        return Ok((None, text));
    };

    let prefix = prefix.trim();
    let value = match (prefix.get(..5), prefix.get(5..)) {
        (Some(tag), Some(value)) if tag.eq_ignore_ascii_case("srid=") => value,
        _ => {
            return Err(EngineError::InvalidGeometry(format!(
                "unexpected prefix '{}'",
                prefix
            )))
        }
    };

    let srid = value
        .trim()
        .parse::<i32>()
        .map_err(|_| EngineError::InvalidGeometry(format!("invalid SRID in '{}'", prefix)))?;

    Ok((Some(srid), rest.trim()))
}

/// Decode a well-known binary geometry as returned by storage.
pub fn decode_wkb(bytes: &[u8]) -> Result<Geometry<f64>, String> {
    geozero::wkb::Wkb(bytes.to_vec())
        .to_geo()
        .map_err(|e| e.to_string())
}

/// A spatial filter on the geometry column.
#[derive(Debug, Clone, PartialEq)]
pub enum SpatialPredicate {
    /// Rows whose geometry intersects the query geometry.
    Intersects { geometry: QueryGeometry },
    /// Rows whose geometry intersects the query geometry buffered by
    /// `distance_m` meters on the ellipsoid.
    IntersectsBuffered {
        geometry: QueryGeometry,
        distance_m: f64,
    },
}

impl SpatialPredicate {
    pub fn geometry(&self) -> &QueryGeometry {
        match self {
            SpatialPredicate::Intersects { geometry } => geometry,
            SpatialPredicate::IntersectsBuffered { geometry, .. } => geometry,
        }
    }
}

/// The spatial part of a data query, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SpatialQuery {
    Position {
        coords: String,
    },
    Radius {
        coords: String,
        within: f64,
        within_units: String,
    },
    Area {
        coords: String,
        resolution_x: Option<String>,
        resolution_y: Option<String>,
    },
    Cube {
        /// `None` when no bbox was supplied.
        bbox: Option<Vec<Option<f64>>>,
    },
    Trajectory {
        coords: String,
    },
    Corridor {
        coords: String,
        width: f64,
        width_units: String,
        /// Accepted for completeness; vertical extent is not filtered.
        height: Option<f64>,
        height_units: Option<String>,
    },
}

impl SpatialQuery {
    pub fn query_type(&self) -> edr_protocol::QueryType {
        use edr_protocol::QueryType;

        match self {
            SpatialQuery::Position { .. } => QueryType::Position,
            SpatialQuery::Radius { .. } => QueryType::Radius,
            SpatialQuery::Area { .. } => QueryType::Area,
            SpatialQuery::Cube { .. } => QueryType::Cube,
            SpatialQuery::Trajectory { .. } => QueryType::Trajectory,
            SpatialQuery::Corridor { .. } => QueryType::Corridor,
        }
    }
}

/// Builds spatial predicates for each query shape.
#[derive(Debug, Clone)]
pub struct GeometryPredicateBuilder {
    default_srid: i32,
    position_buffer_m: f64,
}

impl Default for GeometryPredicateBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SRID, POSITION_BUFFER_METERS)
    }
}

impl GeometryPredicateBuilder {
    pub fn new(default_srid: i32, position_buffer_m: f64) -> Self {
        Self {
            default_srid,
            position_buffer_m,
        }
    }

    /// Build the predicate for any query shape.
    pub fn build(&self, query: &SpatialQuery) -> EngineResult<SpatialPredicate> {
        match query {
            SpatialQuery::Position { coords } => self.position(coords),
            SpatialQuery::Radius {
                coords,
                within,
                within_units,
            } => self.radius(coords, *within, within_units),
            SpatialQuery::Area {
                coords,
                resolution_x,
                resolution_y,
            } => {
                let has_resolution = |v: &Option<String>| {
                    v.as_deref().map(str::trim).is_some_and(|v| !v.is_empty())
                };
                if has_resolution(resolution_x) || has_resolution(resolution_y) {
                    return Err(EngineError::UnsupportedResolution);
                }
                self.area(coords)
            }
            SpatialQuery::Cube { bbox } => self.cube(bbox.as_deref()),
            SpatialQuery::Trajectory { coords } => self.trajectory(coords),
            SpatialQuery::Corridor {
                coords,
                width,
                width_units,
                ..
            } => self.corridor(coords, *width, width_units),
        }
    }

    /// Points are matched within the position buffer.
    pub fn position(&self, wkt: &str) -> EngineResult<SpatialPredicate> {
        self.radius(wkt, self.position_buffer_m, "m")
    }

    pub fn radius(&self, wkt: &str, distance: f64, unit: &str) -> EngineResult<SpatialPredicate> {
        let distance_m = to_meters(distance, unit)?;
        if !distance_m.is_finite() || distance_m < 0.0 {
            return Err(EngineError::InvalidDistance(format!(
                "{} {} is not a usable distance",
                distance, unit
            )));
        }

        let geometry = QueryGeometry::parse(wkt, self.default_srid)?;
        debug!(srid = geometry.srid, distance_m, "Built buffered spatial predicate");

        Ok(SpatialPredicate::IntersectsBuffered {
            geometry,
            distance_m,
        })
    }

    pub fn area(&self, wkt: &str) -> EngineResult<SpatialPredicate> {
        let geometry = QueryGeometry::parse(wkt, self.default_srid)?;
        Ok(SpatialPredicate::Intersects { geometry })
    }

    pub fn cube(&self, bbox: Option<&[Option<f64>]>) -> EngineResult<SpatialPredicate> {
        let polygon = bbox_polygon(bbox)?;
        Ok(SpatialPredicate::Intersects {
            geometry: QueryGeometry::new(Geometry::Polygon(polygon), self.default_srid),
        })
    }

    /// Trajectories reuse the position buffer; there is no dedicated
    /// line predicate.
    pub fn trajectory(&self, wkt: &str) -> EngineResult<SpatialPredicate> {
        self.position(wkt)
    }

    /// `width` is the full corridor width, so half of it is buffered on each side.
    pub fn corridor(&self, wkt: &str, width: f64, unit: &str) -> EngineResult<SpatialPredicate> {
        self.radius(wkt, width / 2.0, unit)
    }
}

/// Closed ring for a 4 or 6 element bbox.
///
/// Corners are emitted as `(x1,y1),(x1,y2),(x2,y2),(x2,y1),(x1,y1)` exactly as
/// given; inverted boxes are not normalized. Vertical components of a
/// 6 element bbox are ignored.
pub fn bbox_ring(bbox: Option<&[Option<f64>]>) -> EngineResult<Vec<(f64, f64)>> {
    let bbox = bbox.ok_or(EngineError::MissingBoundingBoxValue)?;

    let indices: [usize; 4] = match bbox.len() {
        4 => [0, 1, 2, 3],
        6 => [0, 1, 3, 4],
        n => return Err(EngineError::InvalidBoundingBoxLength(n)),
    };

    let mut values = [0.0f64; 4];
    for (slot, index) in values.iter_mut().zip(indices) {
        *slot = bbox[index].ok_or(EngineError::MissingBoundingBoxValue)?;
    }
    let [x1, y1, x2, y2] = values;

    Ok(vec![(x1, y1), (x1, y2), (x2, y2), (x2, y1), (x1, y1)])
}

/// Polygon for a bbox; see [`bbox_ring`].
pub fn bbox_polygon(bbox: Option<&[Option<f64>]>) -> EngineResult<Polygon<f64>> {
    let ring = bbox_ring(bbox)?;
    let exterior: LineString<f64> = ring.into_iter().map(|(x, y)| Coord { x, y }).collect();
    Ok(Polygon::new(exterior, Vec::new()))
}
