//! Named-location handlers.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::Response,
    Json,
};
use edr_protocol::queries::{non_empty, parse_bbox};
use edr_protocol::LocationsQueryParams;
use metrics::counter;
use query_engine::LocationsRequest;
use tokio_util::sync::CancellationToken;

use super::response::{geojson_stream, ApiError};
use crate::state::AppState;

/// GET /edr/collections/:collection_id/locations
///
/// Names of the locations cached for the collection, as a JSON array.
pub async fn locations_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(collection_id): Path<String>,
    Query(params): Query<LocationsQueryParams>,
) -> Result<Json<Vec<String>>, ApiError> {
    list_locations(state, collection_id, None, params).await
}

/// GET /edr/collections/:collection_id/instances/:instance_id/locations
pub async fn instance_locations_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((collection_id, instance_id)): Path<(String, String)>,
    Query(params): Query<LocationsQueryParams>,
) -> Result<Json<Vec<String>>, ApiError> {
    list_locations(state, collection_id, Some(instance_id), params).await
}

/// GET /edr/collections/:collection_id/locations/:location_id
///
/// Rows cached against the named location, streamed as GeoJSON.
pub async fn location_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((collection_id, location_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    location_items(state, collection_id, None, location_id).await
}

/// GET /edr/collections/:collection_id/instances/:instance_id/locations/:location_id
pub async fn instance_location_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((collection_id, instance_id, location_id)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    location_items(state, collection_id, Some(instance_id), location_id).await
}

async fn list_locations(
    state: Arc<AppState>,
    collection_id: String,
    instance_id: Option<String>,
    params: LocationsQueryParams,
) -> Result<Json<Vec<String>>, ApiError> {
    counter!("edr_http_requests_total", "endpoint" => "locations").increment(1);

    let request = LocationsRequest {
        collection_id,
        bbox: non_empty(params.bbox.as_deref())
            .map(parse_bbox)
            .transpose()?,
        datetime: non_empty(params.datetime.as_deref()).map(String::from),
        instance_id,
    };

    let names = state
        .orchestrator
        .locations(&request, &CancellationToken::new())
        .await?;
    Ok(Json(names))
}

async fn location_items(
    state: Arc<AppState>,
    collection_id: String,
    instance_id: Option<String>,
    location_id: String,
) -> Result<Response, ApiError> {
    counter!("edr_http_requests_total", "endpoint" => "location").increment(1);

    let prepared = state
        .orchestrator
        .prepare_location(
            &collection_id,
            &location_id,
            instance_id.as_deref(),
            &CancellationToken::new(),
        )
        .await?;
    Ok(geojson_stream(prepared))
}
