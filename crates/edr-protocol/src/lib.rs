//! OGC API - Environmental Data Retrieval (EDR) Protocol
//!
//! Wire types shared by the EDR service and the query engine:
//! - raw data-query parameters ([`queries`])
//! - the structured error list returned on failed requests ([`errors`])
//! - EDR GeoJSON features ([`geojson`])

pub mod errors;
pub mod geojson;
pub mod queries;

// Re-export commonly used types
pub use errors::{ErrorDetail, ErrorResponse};
pub use geojson::{Feature, FeatureCollection, Geometry};
pub use queries::{
    DataQueryParams, ItemsQueryParams, LocationsQueryParams, QueryParseError, QueryType,
};

/// Media types used in EDR responses
pub mod media_types {
    /// GeoJSON media type
    pub const GEO_JSON: &str = "application/geo+json";
    /// JSON media type
    pub const JSON: &str = "application/json";
}
