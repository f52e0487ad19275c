//! Row storage connections.
//!
//! Locations flagged as living in the catalogue database share its pool;
//! every other location gets a lazily connected pool built from the
//! connection details stored with the location.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres};
use tokio::sync::RwLock;
use tracing::{debug, info};

use query_engine::{
    CompiledQuery, EngineResult, FieldValue, Location, RowSource, RowStream, SelectQuery,
    StorageConnectionProvider,
};

use crate::error::{db_error, StorageError, StorageResult};
use crate::rows::decode_row;

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection details stored as JSON on an external location.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectionDetails {
    pub data_source: String,
    pub initial_catalog: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub provider_name: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub connection_timeout: Option<u64>,
}

impl ConnectionDetails {
    pub fn from_location(location: &Location) -> StorageResult<Self> {
        let details = location
            .details
            .clone()
            .ok_or_else(|| StorageError::InvalidDetails {
                location_id: location.id,
                message: "no connection details".to_string(),
            })?;

        serde_json::from_value(details).map_err(|e| StorageError::InvalidDetails {
            location_id: location.id,
            message: e.to_string(),
        })
    }

    /// Host and port from `host`, `host:port` or `host,port`.
    pub fn host_port(&self) -> Result<(String, u16), String> {
        let source = self.data_source.trim();
        match source.rsplit_once(|c| c == ':' || c == ',') {
            Some((host, port)) => {
                let port = port
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| format!("invalid port in data source '{}'", source))?;
                Ok((host.trim().to_string(), port))
            }
            None => Ok((source.to_string(), DEFAULT_PORT)),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// PostgreSQL connect options, rejecting other providers.
    pub fn connect_options(&self, location_id: i32) -> StorageResult<PgConnectOptions> {
        if let Some(provider) = &self.provider_name {
            let supported = ["npgsql", "postgres", "postgresql"]
                .iter()
                .any(|p| provider.eq_ignore_ascii_case(p));
            if !supported {
                return Err(StorageError::UnsupportedProvider(provider.clone()));
            }
        }

        let (host, port) = self
            .host_port()
            .map_err(|message| StorageError::InvalidDetails { location_id, message })?;

        let mut options = PgConnectOptions::new()
            .host(&host)
            .port(port)
            .database(&self.initial_catalog);
        if let Some(user) = &self.user_id {
            options = options.username(user);
        }
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        Ok(options)
    }
}

/// Opens connections for storage locations.
pub struct PgConnectionProvider {
    catalog_pool: PgPool,
    max_connections: u32,
    external: RwLock<HashMap<i32, PgPool>>,
}

impl PgConnectionProvider {
    pub fn new(catalog_pool: PgPool, max_connections: u32) -> Self {
        Self {
            catalog_pool,
            max_connections,
            external: RwLock::new(HashMap::new()),
        }
    }

    async fn pool_for(&self, location: &Location) -> StorageResult<PgPool> {
        if location.is_this_database {
            return Ok(self.catalog_pool.clone());
        }

        if let Some(pool) = self.external.read().await.get(&location.id) {
            return Ok(pool.clone());
        }

        let details = ConnectionDetails::from_location(location)?;
        let options = details.connect_options(location.id)?;

        let mut external = self.external.write().await;
        let pool = external
            .entry(location.id)
            .or_insert_with(|| {
                info!(
                    location_id = location.id,
                    data_source = %details.data_source,
                    "Creating pool for external location"
                );
                PgPoolOptions::new()
                    .max_connections(self.max_connections)
                    .acquire_timeout(details.timeout())
                    .connect_lazy_with(options)
            })
            .clone();
        Ok(pool)
    }
}

#[async_trait]
impl StorageConnectionProvider for PgConnectionProvider {
    async fn connect(&self, location: &Location) -> EngineResult<Box<dyn RowSource>> {
        let pool = self.pool_for(location).await?;
        let conn = pool.acquire().await.map_err(db_error)?;
        debug!(location_id = location.id, "Acquired storage connection");
        Ok(Box::new(PgRowSource::new(conn)))
    }
}

/// A pooled connection executing compiled select statements.
pub struct PgRowSource {
    conn: PoolConnection<Postgres>,
    compiled: Option<CompiledQuery>,
}

impl PgRowSource {
    pub fn new(conn: PoolConnection<Postgres>) -> Self {
        Self {
            conn,
            compiled: None,
        }
    }
}

impl RowSource for PgRowSource {
    fn fetch(&mut self, query: SelectQuery) -> RowStream<'_> {
        let compiled = match query.compile() {
            Ok(compiled) => compiled,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };
        debug!(sql = %compiled.sql, params = compiled.params.len(), "Executing query");

        // The statement text and parameters must outlive the row stream.
        let compiled = self.compiled.insert(compiled);
        let query = compiled
            .params
            .iter()
            .fold(sqlx::query(&compiled.sql), bind_value);

        query
            .fetch(&mut *self.conn)
            .map(|row| row.map_err(db_error).and_then(|row| decode_row(&row)))
            .boxed()
    }
}

pub(crate) fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q FieldValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        FieldValue::Null => query.bind(None::<String>),
        FieldValue::Bool(v) => query.bind(*v),
        FieldValue::Int(v) => query.bind(*v),
        FieldValue::Float(v) => query.bind(*v),
        FieldValue::Text(v) => query.bind(v.as_str()),
        FieldValue::Bytes(v) => query.bind(v.as_slice()),
        FieldValue::Timestamp(v) => query.bind(*v),
        FieldValue::Date(v) => query.bind(*v),
        FieldValue::Json(v) => query.bind(sqlx::types::Json(v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn external(details: serde_json::Value) -> Location {
        Location {
            id: 9,
            schema: "data".to_string(),
            table_name_prefix: "rs_".to_string(),
            is_this_database: false,
            details: Some(details),
        }
    }

    #[test]
    fn test_details_from_location() {
        let location = external(json!({
            "DataSource": "db.internal:5433",
            "InitialCatalog": "records",
            "UserId": "reader",
            "Password": "secret",
            "ProviderName": "Npgsql",
            "ConnectionTimeout": 5
        }));

        let details = ConnectionDetails::from_location(&location).unwrap();
        assert_eq!(details.initial_catalog, "records");
        assert_eq!(details.host_port().unwrap(), ("db.internal".to_string(), 5433));
        assert_eq!(details.timeout(), Duration::from_secs(5));
        assert!(details.connect_options(location.id).is_ok());
    }

    #[test]
    fn test_host_port_forms() {
        let mut details = ConnectionDetails::from_location(&external(json!({
            "DataSource": "db.internal",
            "InitialCatalog": "records"
        })))
        .unwrap();
        assert_eq!(details.host_port().unwrap(), ("db.internal".to_string(), 5432));
        assert_eq!(details.timeout(), Duration::from_secs(30));

        details.data_source = "db.internal,6432".to_string();
        assert_eq!(details.host_port().unwrap().1, 6432);

        details.data_source = "db.internal:port".to_string();
        assert!(details.host_port().is_err());
    }

    #[test]
    fn test_unsupported_provider() {
        let details = ConnectionDetails::from_location(&external(json!({
            "DataSource": "sql.internal",
            "InitialCatalog": "records",
            "ProviderName": "System.Data.SqlClient"
        })))
        .unwrap();

        assert!(matches!(
            details.connect_options(9),
            Err(StorageError::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn test_missing_details() {
        let mut location = external(json!({}));
        assert!(matches!(
            ConnectionDetails::from_location(&location),
            Err(StorageError::InvalidDetails { location_id: 9, .. })
        ));

        location.details = None;
        assert!(ConnectionDetails::from_location(&location).is_err());
    }
}
