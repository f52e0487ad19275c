//! HTTP tests of the EDR routes against an in-memory catalog.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use tower::ServiceExt;

use edr_api::{router, AppState};
use query_engine::model::{
    CREATED_VERSION_COLUMN, DELETED_VERSION_COLUMN, GEOMETRY_COLUMN, ID_COLUMN,
};
use query_engine::{
    Collection, Field, FieldValue, InMemoryCatalog, Location, LocationCacheEntry, QueryGeometry,
    QueryOrchestrator, Row, TableName,
};

fn gauge(id: i64, wkt: &str, name: &str, created: Option<i64>, deleted: Option<i64>) -> Row {
    Row::new()
        .with(ID_COLUMN, id)
        .with(
            GEOMETRY_COLUMN,
            QueryGeometry::parse(wkt, 4326).unwrap().to_wkb().unwrap(),
        )
        .with("name", name)
        .with("observed", Utc.with_ymd_and_hms(2018, 2, 12, 10, 0, 0).unwrap())
        .with(CREATED_VERSION_COLUMN, FieldValue::from(created))
        .with(DELETED_VERSION_COLUMN, FieldValue::from(deleted))
}

fn cached(location_id: i32, row_id: i64, wkt: &str, deleted: Option<i64>) -> LocationCacheEntry {
    LocationCacheEntry {
        collection_id: 1,
        location_id,
        row_id,
        geometry: Some(QueryGeometry::parse(wkt, 4326).unwrap().to_wkb().unwrap()),
        created_version: Some(1),
        deleted_version: deleted,
    }
}

fn app() -> Router {
    let catalog = InMemoryCatalog::new()
        .with_location(Location {
            id: 1,
            schema: "data".to_string(),
            table_name_prefix: "rs_".to_string(),
            is_this_database: true,
            details: None,
        })
        .with_collection(Collection {
            id: 1,
            name: "River gauges".to_string(),
            table_name: None,
            location_id: 1,
            date_column: Some("observed".to_string()),
            published: true,
        })
        .with_collection(Collection {
            id: 5,
            name: "Dropped table".to_string(),
            table_name: Some("gone".to_string()),
            location_id: 1,
            date_column: None,
            published: true,
        })
        .with_fields(
            1,
            vec![
                Field {
                    name: "name".to_string(),
                    column_name: "name".to_string(),
                    field_type: "Text".to_string(),
                    include_in_data: true,
                },
                Field {
                    name: "observed".to_string(),
                    column_name: "observed".to_string(),
                    field_type: "DateTime".to_string(),
                    include_in_data: true,
                },
            ],
        )
        .with_versions(1, [1, 2])
        .with_rows(
            TableName::new("data", "rs_1"),
            vec![
                gauge(1, "POINT(-3.5 50.7)", "Exe Bridge", Some(1), None),
                gauge(2, "POINT(-3.4 50.8)", "Cowley", Some(2), None),
                gauge(3, "POINT(-3.5 50.7)", "Old gauge", Some(1), Some(2)),
                gauge(4, "POINT(10 10)", "Far away", None, None),
            ],
        )
        .with_named_location(10, "Exeter")
        .with_named_location(11, "Tiverton")
        .with_cached_row(cached(10, 1, "POINT(-3.5 50.7)", None))
        .with_cached_row(cached(10, 3, "POINT(-3.5 50.7)", Some(2)))
        .with_cached_row(cached(11, 4, "POINT(10 10)", None));

    let catalog = Arc::new(catalog);
    let orchestrator =
        QueryOrchestrator::new(catalog.clone(), catalog.clone(), catalog.clone(), catalog);
    router(Arc::new(AppState::new(orchestrator)))
}

async fn get(uri: &str) -> (StatusCode, Option<String>, Value) {
    let response = app()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, content_type, body)
}

fn names(body: &Value) -> Vec<&str> {
    body["features"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["properties"]["name"].as_str().unwrap())
        .collect()
}

// ============================================================================
// Data queries
// ============================================================================

#[tokio::test]
async fn test_position_streams_geojson() {
    let (status, content_type, body) =
        get("/edr/collections/1/position?coords=POINT(-3.5%2050.7)").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/geo+json"));
    assert_eq!(body["type"], "FeatureCollection");
    assert_eq!(names(&body), vec!["Exe Bridge"]);
    assert_eq!(body["numberOfReturned"], 1);
}

#[tokio::test]
async fn test_instance_route_uses_version() {
    let (status, _, body) =
        get("/edr/collections/1/instances/1/position?coords=POINT(-3.5%2050.7)").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&body), vec!["Exe Bridge", "Old gauge"]);
}

#[tokio::test]
async fn test_radius_and_cube() {
    let (status, _, body) =
        get("/edr/collections/1/radius?coords=POINT(-3.45%2050.75)&within=20&within-units=km").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&body), vec!["Exe Bridge", "Cowley"]);

    let (status, _, body) = get("/edr/collections/1/cube?bbox=-6.1,50.3,-2.6,51.6").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&body), vec!["Exe Bridge", "Cowley"]);
}

#[tokio::test]
async fn test_datetime_and_parameter_names() {
    let (status, _, body) = get(
        "/edr/collections/1/cube?bbox=-6.1,50.3,-2.6,51.6&datetime=2018-02-12&parameter-name=name",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let properties = body["features"][0]["properties"].as_object().unwrap();
    assert_eq!(properties.len(), 1);
    assert!(properties.contains_key("name"));
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_validation_errors_are_listed() {
    let (status, content_type, body) = get("/edr/collections/1/cube").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert_eq!(body[0]["statusCode"], 400);
    assert_eq!(body[0]["source"], "bbox");

    let (status, _, body) = get("/edr/collections/1/position?coords=POINT(nope)").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body[0]["description"], "Unable to parse Well Known Text");

    let (status, _, body) =
        get("/edr/collections/1/radius?coords=POINT(-3.5%2050.7)&within=5&within-units=parsecs")
            .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body[0]["source"], "units");

    let (status, _, body) =
        get("/edr/collections/1/position?coords=POINT(-3.5%2050.7)&f=CoverageJSON").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body[0]["source"], "f");
}

#[tokio::test]
async fn test_radius_requires_within() {
    let (status, _, body) = get("/edr/collections/1/radius?coords=POINT(-3.5%2050.7)").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body[0]["source"], "within");
}

#[tokio::test]
async fn test_not_found_errors() {
    let (status, _, body) = get("/edr/collections/42/position?coords=POINT(0%200)").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body[0]["description"], "Collection not found");

    let (status, _, _) =
        get("/edr/collections/1/instances/9/position?coords=POINT(-3.5%2050.7)").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Items
// ============================================================================

#[tokio::test]
async fn test_items_list() {
    let (status, content_type, body) =
        get("/edr/collections/1/items?bbox=-6.1,50.3,-2.6,51.6").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert_eq!(body, serde_json::json!([1, 2]));

    let (status, _, body) = get("/edr/collections/1/items?bbox=-6.1,50.3,-2.6,51.6&instance=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([1, 3]));

    let (status, _, _) = get("/edr/collections/1/items").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_single_item() {
    let (status, _, body) = get("/edr/collections/1/items/2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&body), vec!["Cowley"]);

    let (status, _, body) = get("/edr/collections/1/items/77").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["numberOfReturned"], 0);

    let (status, _, _) = get("/edr/collections/1/items/first").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Named locations
// ============================================================================

#[tokio::test]
async fn test_locations_list() {
    let (status, content_type, body) = get("/edr/collections/1/locations").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert_eq!(body, serde_json::json!(["Exeter", "Tiverton"]));

    let (status, _, body) = get("/edr/collections/1/locations?bbox=-6.1,50.3,-2.6,51.6").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!(["Exeter"]));

    let (status, _, body) = get("/edr/collections/1/instances/2/locations").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!(["Exeter", "Tiverton"]));

    let (status, _, _) = get("/edr/collections/42/locations").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_location_items() {
    let (status, content_type, body) = get("/edr/collections/1/locations/Exeter").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/geo+json"));
    assert_eq!(names(&body), vec!["Exe Bridge"]);

    let (status, _, body) = get("/edr/collections/1/instances/1/locations/Exeter").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&body), vec!["Exe Bridge", "Old gauge"]);

    let (status, _, body) = get("/edr/collections/1/locations/Nowhere").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body[0]["description"], "Named Location not found");

    let (status, _, _) = get("/edr/collections/1/instances/9/locations/Exeter").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Stream failures
// ============================================================================

#[tokio::test]
async fn test_storage_failure_aborts_body() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/edr/collections/5/cube?bbox=-6.1,50.3,-2.6,51.6")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Headers are already out when the table turns out to be missing.
    assert_eq!(response.status(), StatusCode::OK);
    assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_and_metrics() {
    let (status, _, body) = get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let response = app()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
