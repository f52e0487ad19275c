//! Collection metadata catalog using PostgreSQL.
//!
//! Reads the `recordsets` schema (collections, fields, storage locations,
//! versions) and the `ogc` named-location cache. The catalogue is never
//! written to.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Row as _};
use tracing::{debug, info};

use query_engine::model::{
    quote_ident, CREATED_VERSION_COLUMN, DELETED_VERSION_COLUMN, GEOMETRY_COLUMN,
};
use query_engine::{
    Collection, CollectionMetadataProvider, EngineResult, Field, Location, NamedLocation,
    NamedLocationCatalog, Predicate, VersionCatalog,
};

use crate::connection::bind_value;
use crate::error::{db_error, StorageResult};

/// SQL column definitions treated as datetime fields.
pub const DATE_COLUMN_DEFS: [&str; 3] = ["date", "timestamp", "timestamptz"];

/// Catalogue database connection pool and metadata lookups.
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    /// Create a new catalog connection from database URL.
    pub async fn connect(database_url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!(max_connections, "Connected to catalogue database");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct CollectionRow {
    id: i32,
    name: String,
    table_name: Option<String>,
    location_id: i32,
    date_column: Option<String>,
    published: bool,
}

impl From<CollectionRow> for Collection {
    fn from(row: CollectionRow) -> Self {
        Collection {
            id: row.id,
            name: row.name,
            table_name: row.table_name,
            location_id: row.location_id,
            date_column: row.date_column,
            published: row.published,
        }
    }
}

#[derive(FromRow)]
struct LocationRow {
    id: i32,
    schema: String,
    table_name_prefix: String,
    is_this_database: bool,
    details: Option<Value>,
}

impl From<LocationRow> for Location {
    fn from(row: LocationRow) -> Self {
        Location {
            id: row.id,
            schema: row.schema,
            table_name_prefix: row.table_name_prefix,
            is_this_database: row.is_this_database,
            details: row.details,
        }
    }
}

#[derive(FromRow)]
struct FieldRow {
    name: String,
    column_name: String,
    field_type: String,
    include_in_data: bool,
}

#[derive(FromRow)]
struct NamedLocationRow {
    id: i32,
    name: String,
}

impl From<NamedLocationRow> for NamedLocation {
    fn from(row: NamedLocationRow) -> Self {
        NamedLocation {
            id: row.id,
            name: row.name,
        }
    }
}

impl From<FieldRow> for Field {
    fn from(row: FieldRow) -> Self {
        Field {
            name: row.name,
            column_name: row.column_name,
            field_type: row.field_type,
            include_in_data: row.include_in_data,
        }
    }
}

#[async_trait]
impl CollectionMetadataProvider for PgCatalog {
    async fn collection(&self, id: i32) -> EngineResult<Option<Collection>> {
        let row = sqlx::query_as::<_, CollectionRow>(
            "SELECT r.id, r.name, r.table_name, r.location AS location_id, \
             r.publish_to_ogc_edr AS published, \
             (SELECT f.column_name FROM recordsets.fields f \
              JOIN recordsets.field_types t ON t.name = f.type \
              WHERE f.recordset_id = r.id AND t.sql_column_def = ANY($2) \
              ORDER BY f.sequence LIMIT 1) AS date_column \
             FROM recordsets.recordsets r \
             WHERE r.id = $1 AND r.publish_to_ogc_edr AND r.deleted_version IS NULL",
        )
        .bind(id)
        .bind(&DATE_COLUMN_DEFS[..])
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        debug!(collection_id = id, found = row.is_some(), "Looked up collection");
        Ok(row.map(Collection::from))
    }

    async fn location(&self, collection: &Collection) -> EngineResult<Option<Location>> {
        let row = sqlx::query_as::<_, LocationRow>(
            "SELECT id, schema, table_name_prefix, is_this_database, details \
             FROM recordsets.locations WHERE id = $1",
        )
        .bind(collection.location_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(Location::from))
    }

    async fn data_fields(&self, collection: &Collection) -> EngineResult<Vec<Field>> {
        let rows = sqlx::query_as::<_, FieldRow>(
            "SELECT f.name, f.column_name, f.type AS field_type, t.include_in_data \
             FROM recordsets.fields f \
             JOIN recordsets.field_types t ON t.name = f.type \
             WHERE f.recordset_id = $1 \
             ORDER BY f.sequence",
        )
        .bind(collection.id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(Field::from).collect())
    }
}

#[async_trait]
impl VersionCatalog for PgCatalog {
    async fn versions(&self, collection_id: i32) -> EngineResult<BTreeSet<i32>> {
        let ids: Vec<i32> =
            sqlx::query_scalar("SELECT id FROM recordsets.versions WHERE recordset_id = $1")
                .bind(collection_id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?;

        Ok(ids.into_iter().collect())
    }
}

#[async_trait]
impl NamedLocationCatalog for PgCatalog {
    async fn named_location(&self, name: &str) -> EngineResult<Option<NamedLocation>> {
        let row = sqlx::query_as::<_, NamedLocationRow>(
            "SELECT id, name FROM ogc.locations WHERE name = $1 ORDER BY id LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(NamedLocation::from))
    }

    async fn location_names(
        &self,
        collection_id: i32,
        filter: Option<&Predicate>,
    ) -> EngineResult<Vec<String>> {
        let (condition, params) = match filter {
            Some(filter) => {
                let compiled = filter.to_sql()?;
                (compiled.sql, compiled.params)
            }
            None => ("TRUE".to_string(), Vec::new()),
        };
        let sql = location_names_sql(&condition, params.len() + 1);
        debug!(sql = %sql, params = params.len() + 1, "Listing named locations");

        let rows = params
            .iter()
            .fold(sqlx::query(&sql), bind_value)
            .bind(collection_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(db_error))
            .collect()
    }

    async fn cached_row_ids(&self, collection_id: i32, location_id: i32) -> EngineResult<Vec<i64>> {
        sqlx::query_scalar(
            "SELECT row_id::int8 FROM ogc.location_cache \
             WHERE recordset_id = $1 AND location_id = $2 \
             ORDER BY row_id",
        )
        .bind(collection_id)
        .bind(location_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }
}

/// Distinct location names over cache entries matching `condition`.
///
/// Cache columns are exposed under the collection row names so that the
/// engine's visibility and spatial predicates apply as-is. The collection id
/// is bound last, as `$collection_param`.
fn location_names_sql(condition: &str, collection_param: usize) -> String {
    format!(
        "SELECT DISTINCT l.name FROM ogc.locations l \
         JOIN (SELECT location_id, geometry AS {geometry}, \
         created_version AS {created}, deleted_version AS {deleted} \
         FROM ogc.location_cache WHERE recordset_id = ${collection_param}) c \
         ON c.location_id = l.id \
         WHERE l.name IS NOT NULL AND ({condition}) \
         ORDER BY l.name",
        geometry = quote_ident(GEOMETRY_COLUMN),
        created = quote_ident(CREATED_VERSION_COLUMN),
        deleted = quote_ident(DELETED_VERSION_COLUMN),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use query_engine::visibility::at_version;

    #[test]
    fn test_location_names_sql() {
        let compiled = at_version(2).to_sql().unwrap();
        let sql = location_names_sql(&compiled.sql, compiled.params.len() + 1);

        assert!(sql.contains(r#"created_version AS "CreatedVersion""#));
        assert!(sql.contains(r#"geometry AS "MDR_Geometry""#));
        assert!(sql.contains("WHERE recordset_id = $4)"));
        assert!(sql.contains(r#"AND ((("CreatedVersion" <= $1)"#));
        assert!(sql.ends_with("ORDER BY l.name"));
    }

    #[test]
    fn test_location_names_sql_unfiltered() {
        let sql = location_names_sql("TRUE", 1);
        assert!(sql.contains("recordset_id = $1"));
        assert!(sql.contains("l.name IS NOT NULL AND (TRUE)"));
    }

    #[test]
    fn test_named_location_row() {
        let named: NamedLocation = NamedLocationRow {
            id: 3,
            name: "EGLL".to_string(),
        }
        .into();
        assert_eq!(named.id, 3);
        assert_eq!(named.name, "EGLL");
    }

    #[test]
    fn test_row_conversion() {
        let collection: Collection = CollectionRow {
            id: 7,
            name: "Gauges".to_string(),
            table_name: None,
            location_id: 2,
            date_column: Some("observed".to_string()),
            published: true,
        }
        .into();
        assert_eq!(collection.id, 7);
        assert_eq!(collection.date_column.as_deref(), Some("observed"));
    }
}
