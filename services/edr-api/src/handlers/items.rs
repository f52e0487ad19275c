//! Item listing and single item handlers.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::Response,
    Json,
};
use edr_protocol::queries::{non_empty, parse_bbox};
use edr_protocol::ItemsQueryParams;
use metrics::counter;
use query_engine::ItemsRequest;
use tokio_util::sync::CancellationToken;

use super::response::{geojson_stream, ApiError};
use crate::state::AppState;

/// GET /edr/collections/:collection_id/items
///
/// Surrogate ids of the rows inside `bbox`, as a JSON array.
pub async fn items_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(collection_id): Path<String>,
    Query(params): Query<ItemsQueryParams>,
) -> Result<Json<Vec<i64>>, ApiError> {
    counter!("edr_http_requests_total", "endpoint" => "items").increment(1);

    let request = ItemsRequest {
        collection_id,
        bbox: non_empty(params.bbox.as_deref())
            .map(parse_bbox)
            .transpose()?,
        datetime: non_empty(params.datetime.as_deref()).map(String::from),
        instance_id: non_empty(params.instance.as_deref()).map(String::from),
    };

    let ids = state
        .orchestrator
        .items(&request, &CancellationToken::new())
        .await?;
    Ok(Json(ids))
}

/// GET /edr/collections/:collection_id/items/:item_id
pub async fn item_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((collection_id, item_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    counter!("edr_http_requests_total", "endpoint" => "item").increment(1);

    let prepared = state
        .orchestrator
        .prepare_item(&collection_id, &item_id, &CancellationToken::new())
        .await?;
    Ok(geojson_stream(prepared))
}
