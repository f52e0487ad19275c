//! Data query handlers (position, radius, area, cube, trajectory, corridor).
//!
//! Each query type is served at `/edr/collections/:collection_id/<type>` and
//! at `/edr/collections/:collection_id/instances/:instance_id/<type>`.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::Response,
};
use edr_protocol::queries::{non_empty, parse_bbox, parse_number, parse_parameter_names};
use edr_protocol::{DataQueryParams, QueryType};
use metrics::counter;
use query_engine::{DataRequest, EngineError, SpatialQuery};
use tokio_util::sync::CancellationToken;

use super::response::{geojson_stream, ApiError};
use crate::state::AppState;

/// Units assumed when `within-units` or `width-units` is absent.
const DEFAULT_UNITS: &str = "m";

/// Corridor width assumed when `corridor-width` is absent.
const DEFAULT_CORRIDOR_WIDTH: f64 = 1.0;

/// GET /edr/collections/:collection_id/position
pub async fn position_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(collection_id): Path<String>,
    Query(params): Query<DataQueryParams>,
) -> Result<Response, ApiError> {
    data_query(state, QueryType::Position, collection_id, None, params).await
}

/// GET /edr/collections/:collection_id/instances/:instance_id/position
pub async fn instance_position_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((collection_id, instance_id)): Path<(String, String)>,
    Query(params): Query<DataQueryParams>,
) -> Result<Response, ApiError> {
    data_query(state, QueryType::Position, collection_id, Some(instance_id), params).await
}

/// GET /edr/collections/:collection_id/radius
pub async fn radius_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(collection_id): Path<String>,
    Query(params): Query<DataQueryParams>,
) -> Result<Response, ApiError> {
    data_query(state, QueryType::Radius, collection_id, None, params).await
}

/// GET /edr/collections/:collection_id/instances/:instance_id/radius
pub async fn instance_radius_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((collection_id, instance_id)): Path<(String, String)>,
    Query(params): Query<DataQueryParams>,
) -> Result<Response, ApiError> {
    data_query(state, QueryType::Radius, collection_id, Some(instance_id), params).await
}

/// GET /edr/collections/:collection_id/area
pub async fn area_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(collection_id): Path<String>,
    Query(params): Query<DataQueryParams>,
) -> Result<Response, ApiError> {
    data_query(state, QueryType::Area, collection_id, None, params).await
}

/// GET /edr/collections/:collection_id/instances/:instance_id/area
pub async fn instance_area_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((collection_id, instance_id)): Path<(String, String)>,
    Query(params): Query<DataQueryParams>,
) -> Result<Response, ApiError> {
    data_query(state, QueryType::Area, collection_id, Some(instance_id), params).await
}

/// GET /edr/collections/:collection_id/cube
pub async fn cube_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(collection_id): Path<String>,
    Query(params): Query<DataQueryParams>,
) -> Result<Response, ApiError> {
    data_query(state, QueryType::Cube, collection_id, None, params).await
}

/// GET /edr/collections/:collection_id/instances/:instance_id/cube
pub async fn instance_cube_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((collection_id, instance_id)): Path<(String, String)>,
    Query(params): Query<DataQueryParams>,
) -> Result<Response, ApiError> {
    data_query(state, QueryType::Cube, collection_id, Some(instance_id), params).await
}

/// GET /edr/collections/:collection_id/trajectory
pub async fn trajectory_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(collection_id): Path<String>,
    Query(params): Query<DataQueryParams>,
) -> Result<Response, ApiError> {
    data_query(state, QueryType::Trajectory, collection_id, None, params).await
}

/// GET /edr/collections/:collection_id/instances/:instance_id/trajectory
pub async fn instance_trajectory_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((collection_id, instance_id)): Path<(String, String)>,
    Query(params): Query<DataQueryParams>,
) -> Result<Response, ApiError> {
    data_query(state, QueryType::Trajectory, collection_id, Some(instance_id), params).await
}

/// GET /edr/collections/:collection_id/corridor
pub async fn corridor_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(collection_id): Path<String>,
    Query(params): Query<DataQueryParams>,
) -> Result<Response, ApiError> {
    data_query(state, QueryType::Corridor, collection_id, None, params).await
}

/// GET /edr/collections/:collection_id/instances/:instance_id/corridor
pub async fn instance_corridor_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((collection_id, instance_id)): Path<(String, String)>,
    Query(params): Query<DataQueryParams>,
) -> Result<Response, ApiError> {
    data_query(state, QueryType::Corridor, collection_id, Some(instance_id), params).await
}

async fn data_query(
    state: Arc<AppState>,
    query_type: QueryType,
    collection_id: String,
    instance_id: Option<String>,
    params: DataQueryParams,
) -> Result<Response, ApiError> {
    counter!("edr_http_requests_total", "endpoint" => query_type.as_str()).increment(1);

    let request = build_request(query_type, collection_id, instance_id, &params)?;
    tracing::debug!(
        query_type = query_type.as_str(),
        collection_id = %request.collection_id,
        instance_id = ?request.instance_id,
        "Data query"
    );

    // Dropping this handler before streaming starts drops the pipeline with it.
    let prepared = state
        .orchestrator
        .prepare(&request, &CancellationToken::new())
        .await?;

    Ok(geojson_stream(prepared))
}

/// Turn raw query parameters into an engine request.
pub fn build_request(
    query_type: QueryType,
    collection_id: String,
    instance_id: Option<String>,
    params: &DataQueryParams,
) -> Result<DataRequest, ApiError> {
    let mut request = DataRequest::new(collection_id, spatial_query(query_type, params)?);
    request.instance_id = instance_id;
    request.datetime = non_empty(params.datetime.as_deref()).map(String::from);
    request.parameter_names = params
        .parameter_name
        .as_deref()
        .map(parse_parameter_names)
        .unwrap_or_default();
    request.crs = non_empty(params.crs.as_deref()).map(String::from);
    request.format = non_empty(params.f.as_deref()).map(String::from);
    Ok(request)
}

fn spatial_query(query_type: QueryType, params: &DataQueryParams) -> Result<SpatialQuery, ApiError> {
    let coords = params.coords.clone().unwrap_or_default();
    let units = |value: &Option<String>| {
        non_empty(value.as_deref())
            .unwrap_or(DEFAULT_UNITS)
            .to_string()
    };

    let query = match query_type {
        QueryType::Position => SpatialQuery::Position { coords },
        QueryType::Radius => {
            let within = parse_number("within", params.within.as_deref())?.ok_or_else(|| {
                EngineError::InvalidParameter {
                    param: "within".to_string(),
                    message: "Missing required parameter: within".to_string(),
                }
            })?;
            SpatialQuery::Radius {
                coords,
                within,
                within_units: units(&params.within_units),
            }
        }
        QueryType::Area => SpatialQuery::Area {
            coords,
            resolution_x: non_empty(params.resolution_x.as_deref()).map(String::from),
            resolution_y: non_empty(params.resolution_y.as_deref()).map(String::from),
        },
        QueryType::Cube => SpatialQuery::Cube {
            bbox: non_empty(params.bbox.as_deref())
                .map(parse_bbox)
                .transpose()?,
        },
        QueryType::Trajectory => SpatialQuery::Trajectory { coords },
        QueryType::Corridor => SpatialQuery::Corridor {
            coords,
            width: parse_number("corridor-width", params.corridor_width.as_deref())?
                .unwrap_or(DEFAULT_CORRIDOR_WIDTH),
            width_units: units(&params.width_units),
            height: parse_number("corridor-height", params.corridor_height.as_deref())?,
            height_units: non_empty(params.height_units.as_deref()).map(String::from),
        },
        QueryType::Items => {
            return Err(EngineError::InvalidParameter {
                param: "query".to_string(),
                message: "Items are not a data query".to_string(),
            }
            .into())
        }
    };
    Ok(query)
}
