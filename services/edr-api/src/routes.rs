//! Router construction.

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{data, health, items, locations};
use crate::state::AppState;

/// Build the service router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Position query
        .route(
            "/edr/collections/:collection_id/position",
            get(data::position_handler),
        )
        .route(
            "/edr/collections/:collection_id/instances/:instance_id/position",
            get(data::instance_position_handler),
        )
        // Radius query
        .route(
            "/edr/collections/:collection_id/radius",
            get(data::radius_handler),
        )
        .route(
            "/edr/collections/:collection_id/instances/:instance_id/radius",
            get(data::instance_radius_handler),
        )
        // Area query
        .route(
            "/edr/collections/:collection_id/area",
            get(data::area_handler),
        )
        .route(
            "/edr/collections/:collection_id/instances/:instance_id/area",
            get(data::instance_area_handler),
        )
        // Cube query
        .route(
            "/edr/collections/:collection_id/cube",
            get(data::cube_handler),
        )
        .route(
            "/edr/collections/:collection_id/instances/:instance_id/cube",
            get(data::instance_cube_handler),
        )
        // Trajectory query
        .route(
            "/edr/collections/:collection_id/trajectory",
            get(data::trajectory_handler),
        )
        .route(
            "/edr/collections/:collection_id/instances/:instance_id/trajectory",
            get(data::instance_trajectory_handler),
        )
        // Corridor query
        .route(
            "/edr/collections/:collection_id/corridor",
            get(data::corridor_handler),
        )
        .route(
            "/edr/collections/:collection_id/instances/:instance_id/corridor",
            get(data::instance_corridor_handler),
        )
        // Items
        .route(
            "/edr/collections/:collection_id/items",
            get(items::items_handler),
        )
        .route(
            "/edr/collections/:collection_id/items/:item_id",
            get(items::item_handler),
        )
        // Named locations
        .route(
            "/edr/collections/:collection_id/locations",
            get(locations::locations_handler),
        )
        .route(
            "/edr/collections/:collection_id/locations/:location_id",
            get(locations::location_handler),
        )
        .route(
            "/edr/collections/:collection_id/instances/:instance_id/locations",
            get(locations::instance_locations_handler),
        )
        .route(
            "/edr/collections/:collection_id/instances/:instance_id/locations/:location_id",
            get(locations::instance_location_handler),
        )
        // Health and metrics
        .route("/health", get(health::health_handler))
        .route("/metrics", get(health::metrics_handler))
        // Middleware
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}
