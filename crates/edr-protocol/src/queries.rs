//! Query parameter parsing for EDR endpoints.
//!
//! This module handles the raw query-string parameters of the data queries
//! (position, radius, area, cube, trajectory, corridor) and the item and
//! named-location listings. Geometry and datetime values are kept as text here; they are
//! interpreted by the query engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when parsing raw query parameters.
#[derive(Debug, Error, PartialEq)]
pub enum QueryParseError {
    /// A numeric parameter could not be parsed.
    #[error("Invalid value '{value}' for parameter {param}")]
    InvalidNumber { param: String, value: String },
}

impl QueryParseError {
    /// The query parameter that failed to parse.
    pub fn param(&self) -> &str {
        match self {
            QueryParseError::InvalidNumber { param, .. } => param,
        }
    }
}

/// The data query types served by a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Position,
    Radius,
    Area,
    Cube,
    Trajectory,
    Corridor,
    Items,
}

impl QueryType {
    /// Name used in URLs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Position => "position",
            QueryType::Radius => "radius",
            QueryType::Area => "area",
            QueryType::Cube => "cube",
            QueryType::Trajectory => "trajectory",
            QueryType::Corridor => "corridor",
            QueryType::Items => "items",
        }
    }
}

/// Query parameters accepted by the data query endpoints.
///
/// Every query type reads the subset it needs; unused parameters are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DataQueryParams {
    /// Geometry as WKT (optionally prefixed with `SRID=n;`).
    pub coords: Option<String>,

    /// Bounding box `x1,y1,x2,y2` or `x1,y1,z1,x2,y2,z2`.
    pub bbox: Option<String>,

    /// Datetime instant or interval.
    pub datetime: Option<String>,

    /// Radius value.
    pub within: Option<String>,

    /// Distance units for the within parameter.
    #[serde(rename = "within-units")]
    pub within_units: Option<String>,

    /// Full corridor width.
    #[serde(rename = "corridor-width")]
    pub corridor_width: Option<String>,

    /// Units of the corridor width.
    #[serde(rename = "width-units")]
    pub width_units: Option<String>,

    /// Corridor height. Accepted but not applied.
    #[serde(rename = "corridor-height")]
    pub corridor_height: Option<String>,

    /// Units of the corridor height. Accepted but not applied.
    #[serde(rename = "height-units")]
    pub height_units: Option<String>,

    #[serde(rename = "resolution-x")]
    pub resolution_x: Option<String>,

    #[serde(rename = "resolution-y")]
    pub resolution_y: Option<String>,

    /// Parameter name(s) to retrieve.
    #[serde(rename = "parameter-name")]
    pub parameter_name: Option<String>,

    /// Coordinate reference system.
    pub crs: Option<String>,

    /// Output format.
    pub f: Option<String>,
}

/// Query parameters of the item listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ItemsQueryParams {
    pub bbox: Option<String>,
    pub datetime: Option<String>,
    /// Version to list items for; the current snapshot when absent.
    pub instance: Option<String>,
}

/// Query parameters of the named-location listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LocationsQueryParams {
    pub bbox: Option<String>,
    pub datetime: Option<String>,
}

/// Treat an empty or whitespace-only parameter as absent.
pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Parse a bbox parameter into its components.
///
/// Empty entries become `None` so that arity and missing values can be
/// reported separately (`1,2,,4` has four components, one missing).
pub fn parse_bbox(bbox: &str) -> Result<Vec<Option<f64>>, QueryParseError> {
    bbox.split(',')
        .map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return Ok(None);
            }
            part.parse::<f64>()
                .map(Some)
                .map_err(|_| QueryParseError::InvalidNumber {
                    param: "bbox".to_string(),
                    value: part.to_string(),
                })
        })
        .collect()
}

/// Parse an optional numeric parameter.
pub fn parse_number(param: &str, value: Option<&str>) -> Result<Option<f64>, QueryParseError> {
    match non_empty(value) {
        None => Ok(None),
        Some(v) => v.parse::<f64>().map(Some).map_err(|_| QueryParseError::InvalidNumber {
            param: param.to_string(),
            value: v.to_string(),
        }),
    }
}

/// Parse parameter-name query parameter.
pub fn parse_parameter_names(param: &str) -> Vec<String> {
    param
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
