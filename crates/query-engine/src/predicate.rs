//! Composable row predicates.
//!
//! The orchestrator combines the spatial, temporal and visibility filters
//! into one [`Predicate`] tree. Storage collaborators either translate the
//! tree ([`crate::sql`]) or evaluate it directly with [`Predicate::matches`].

use std::cmp::Ordering;

use geo::{CoordsIter, Intersects};
use geo_types::{Coord, Geometry, Line, LineString};

use crate::geometry::{decode_wkb, SpatialPredicate};
use crate::model::{FieldValue, Row};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// A boolean filter over rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Spatial {
        column: String,
        predicate: SpatialPredicate,
    },
    Compare {
        column: String,
        op: CompareOp,
        value: FieldValue,
    },
    IsNull(String),
    /// Column equals one of the values. An empty list matches nothing.
    In {
        column: String,
        values: Vec<FieldValue>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<FieldValue>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Predicate::IsNull(column.into())
    }

    pub fn one_of<V: Into<FieldValue>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Predicate::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn spatial(column: impl Into<String>, predicate: SpatialPredicate) -> Self {
        Predicate::Spatial {
            column: column.into(),
            predicate,
        }
    }

    /// Conjunction of `parts`, flattening nested conjunctions.
    ///
    /// Returns `None` when there is nothing to filter on.
    pub fn all(parts: impl IntoIterator<Item = Predicate>) -> Option<Predicate> {
        let mut flat = Vec::new();
        for part in parts {
            match part {
                Predicate::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }

        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Predicate::And(flat)),
        }
    }

    /// Evaluate against a row.
    ///
    /// Comparisons follow SQL semantics: a null or missing column never
    /// compares true. Buffered spatial predicates measure the great-circle
    /// distance from each vertex to the nearest segment of the other geometry.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Predicate::Spatial { column, predicate } => row
                .get(column)
                .and_then(FieldValue::as_bytes)
                .and_then(|wkb| decode_wkb(wkb).ok())
                .is_some_and(|geometry| spatial_matches(predicate, &geometry)),
            Predicate::Compare { column, op, value } => row
                .get(column)
                .and_then(|actual| compare_values(actual, value))
                .is_some_and(|ordering| op.accepts(ordering)),
            Predicate::IsNull(column) => row.get(column).map_or(true, FieldValue::is_null),
            Predicate::In { column, values } => row.get(column).is_some_and(|actual| {
                values
                    .iter()
                    .any(|v| compare_values(actual, v) == Some(Ordering::Equal))
            }),
            Predicate::And(parts) => parts.iter().all(|p| p.matches(row)),
            Predicate::Or(parts) => parts.iter().any(|p| p.matches(row)),
        }
    }
}

fn compare_values(a: &FieldValue, b: &FieldValue) -> Option<Ordering> {
    use FieldValue::*;

    match (a, b) {
        (Null, _) | (_, Null) => None,
        (Int(x), Int(y)) => Some(x.cmp(y)),
        (Int(x), Float(y)) => (*x as f64).partial_cmp(y),
        (Float(x), Int(y)) => x.partial_cmp(&(*y as f64)),
        (Float(x), Float(y)) => x.partial_cmp(y),
        (Text(x), Text(y)) => Some(x.cmp(y)),
        (Bool(x), Bool(y)) => Some(x.cmp(y)),
        _ => match (a.as_timestamp(), b.as_timestamp()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => None,
        },
    }
}

fn spatial_matches(predicate: &SpatialPredicate, row_geometry: &Geometry<f64>) -> bool {
    match predicate {
        SpatialPredicate::Intersects { geometry } => row_geometry.intersects(&geometry.geometry),
        SpatialPredicate::IntersectsBuffered {
            geometry,
            distance_m,
        } => {
            row_geometry.intersects(&geometry.geometry)
                || within_distance(row_geometry, &geometry.geometry, *distance_m)
        }
    }
}

/// Whether two disjoint geometries come within `distance_m` of each other.
fn within_distance(a: &Geometry<f64>, b: &Geometry<f64>, distance_m: f64) -> bool {
    let near = |from: &Geometry<f64>, to: &[Line<f64>]| {
        from.coords_iter()
            .any(|c| to.iter().any(|s| distance_to_segment(c, s) <= distance_m))
    };
    near(a, segments(b).as_slice()) || near(b, segments(a).as_slice())
}

/// Edges of a geometry. Points become zero-length segments.
fn segments(geometry: &Geometry<f64>) -> Vec<Line<f64>> {
    fn ring(ls: &LineString<f64>, out: &mut Vec<Line<f64>>) {
        match ls.0.as_slice() {
            [only] => out.push(Line::new(*only, *only)),
            _ => out.extend(ls.lines()),
        }
    }

    let mut out = Vec::new();
    match geometry {
        Geometry::Point(p) => out.push(Line::new(p.0, p.0)),
        Geometry::MultiPoint(mp) => out.extend(mp.iter().map(|p| Line::new(p.0, p.0))),
        Geometry::Line(line) => out.push(*line),
        Geometry::LineString(ls) => ring(ls, &mut out),
        Geometry::MultiLineString(mls) => mls.iter().for_each(|ls| ring(ls, &mut out)),
        Geometry::Polygon(polygon) => {
            ring(polygon.exterior(), &mut out);
            polygon.interiors().iter().for_each(|ls| ring(ls, &mut out));
        }
        Geometry::MultiPolygon(mp) => mp
            .iter()
            .flat_map(|polygon| std::iter::once(polygon.exterior()).chain(polygon.interiors()))
            .for_each(|ls| ring(ls, &mut out)),
        Geometry::Rect(rect) => ring(rect.to_polygon().exterior(), &mut out),
        Geometry::Triangle(triangle) => ring(triangle.to_polygon().exterior(), &mut out),
        Geometry::GeometryCollection(gc) => gc.iter().for_each(|g| out.extend(segments(g))),
    }
    out
}

/// Distance in meters from a lon/lat position to a segment.
///
/// The nearest point is found in a plane scaled by the cosine of the
/// latitude, then measured on the sphere.
fn distance_to_segment(point: Coord<f64>, segment: &Line<f64>) -> f64 {
    let (start, end) = (segment.start, segment.end);
    let scale = point.y.to_radians().cos();
    let dx = (end.x - start.x) * scale;
    let dy = end.y - start.y;

    let length_sq = dx * dx + dy * dy;
    if length_sq == 0.0 {
        return haversine_distance(point.x, point.y, start.x, start.y);
    }

    let t = (((point.x - start.x) * scale) * dx + (point.y - start.y) * dy) / length_sq;
    let t = t.clamp(0.0, 1.0);
    haversine_distance(
        point.x,
        point.y,
        start.x + t * (end.x - start.x),
        start.y + t * (end.y - start.y),
    )
}

/// Earth's radius in meters (WGS84 mean radius).
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance in meters between two lon/lat positions.
pub fn haversine_distance(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}
