//! Shared fixture: a small river-gauge collection held in memory.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use query_engine::model::{CREATED_VERSION_COLUMN, DELETED_VERSION_COLUMN, GEOMETRY_COLUMN, ID_COLUMN};
use query_engine::{
    Collection, Field, FieldValue, InMemoryCatalog, Location, LocationCacheEntry, QueryGeometry,
    QueryOrchestrator, Row, TableName,
};

pub const GAUGES: &str = "1";
pub const DRAFT: &str = "2";
pub const ORPHAN: &str = "3";

pub fn wkb(wkt: &str) -> Vec<u8> {
    QueryGeometry::parse(wkt, 4326).unwrap().to_wkb().unwrap()
}

pub fn gauge(
    id: i64,
    wkt: &str,
    name: &str,
    level: f64,
    observed: (i32, u32, u32, u32),
    created: Option<i64>,
    deleted: Option<i64>,
) -> Row {
    let (y, m, d, h) = observed;
    Row::new()
        .with(ID_COLUMN, id)
        .with(GEOMETRY_COLUMN, wkb(wkt))
        .with("name", name)
        .with("level", level)
        .with("observed", Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap())
        .with("internal_ref", format!("ref-{}", id))
        .with(CREATED_VERSION_COLUMN, FieldValue::from(created))
        .with(DELETED_VERSION_COLUMN, FieldValue::from(deleted))
}

fn field(column: &str, field_type: &str, include_in_data: bool) -> Field {
    Field {
        name: column.to_string(),
        column_name: column.to_string(),
        field_type: field_type.to_string(),
        include_in_data,
    }
}

fn cached(location_id: i32, row_id: i64, wkt: &str, created: i64, deleted: Option<i64>) -> LocationCacheEntry {
    LocationCacheEntry {
        collection_id: 1,
        location_id,
        row_id,
        geometry: Some(wkb(wkt)),
        created_version: Some(created),
        deleted_version: deleted,
    }
}

/// Rows, in storage order:
///
/// | id | where           | level | observed         | created | deleted |
/// |----|-----------------|-------|------------------|---------|---------|
/// | 1  | -3.5 50.7       | 1.2   | 2018-02-12 10:00 | 1       |         |
/// | 2  | -3.4 50.8       | inf   | 2018-02-13 09:00 | 2       |         |
/// | 3  | -3.5 50.7       | 0.5   | 2018-02-12 08:00 | 1       | 2       |
/// | 4  | 10 10           | 3.0   | 2018-03-01 12:00 |         |         |
///
/// Named locations: `Exeter` caches rows 1 and 3, `Cowley` row 2 (from
/// version 2) and `Equator` row 4.
pub fn catalog() -> InMemoryCatalog {
    let location = Location {
        id: 1,
        schema: "data".to_string(),
        table_name_prefix: "rs_".to_string(),
        is_this_database: true,
        details: None,
    };

    InMemoryCatalog::new()
        .with_location(location)
        .with_collection(Collection {
            id: 1,
            name: "River gauges".to_string(),
            table_name: None,
            location_id: 1,
            date_column: Some("observed".to_string()),
            published: true,
        })
        .with_collection(Collection {
            id: 2,
            name: "Draft".to_string(),
            table_name: None,
            location_id: 1,
            date_column: None,
            published: false,
        })
        .with_collection(Collection {
            id: 3,
            name: "Orphan".to_string(),
            table_name: None,
            location_id: 99,
            date_column: None,
            published: true,
        })
        .with_fields(
            1,
            vec![
                field("name", "Text", true),
                field("level", "Double", true),
                field("observed", "DateTime", true),
                field("internal_ref", "Reference", false),
            ],
        )
        .with_versions(1, [1, 2, 3])
        .with_rows(
            TableName::new("data", "rs_1"),
            vec![
                gauge(1, "POINT(-3.5 50.7)", "Exe Bridge", 1.2, (2018, 2, 12, 10), Some(1), None),
                gauge(2, "POINT(-3.4 50.8)", "Cowley", f64::INFINITY, (2018, 2, 13, 9), Some(2), None),
                gauge(3, "POINT(-3.5 50.7)", "Old gauge", 0.5, (2018, 2, 12, 8), Some(1), Some(2)),
                gauge(4, "POINT(10 10)", "Far away", 3.0, (2018, 3, 1, 12), None, None),
            ],
        )
        .with_named_location(10, "Exeter")
        .with_named_location(11, "Cowley")
        .with_named_location(12, "Equator")
        .with_cached_row(cached(10, 1, "POINT(-3.5 50.7)", 1, None))
        .with_cached_row(cached(10, 3, "POINT(-3.5 50.7)", 1, Some(2)))
        .with_cached_row(cached(11, 2, "POINT(-3.4 50.8)", 2, None))
        .with_cached_row(cached(12, 4, "POINT(10 10)", 1, None))
}

pub fn orchestrator() -> QueryOrchestrator {
    let catalog = Arc::new(catalog());
    QueryOrchestrator::new(catalog.clone(), catalog.clone(), catalog.clone(), catalog)
}
