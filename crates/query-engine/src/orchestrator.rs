//! Request pipeline.
//!
//! ```text
//! format -> collection -> location -> table -> fields -> predicates -> connect
//!                                                       (prepare ends here)
//!        -> fetch rows -> GeoJSON writer
//!                                                       (stream)
//! ```
//!
//! Named-location listings and item lookups go through the location cache
//! and end in the same visibility filter and writer.
//!
//! Every suspend point observes the request's cancellation token.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::geometry::{GeometryPredicateBuilder, SpatialQuery};
use crate::model::{Collection, Field, Location, TableName, GEOMETRY_COLUMN, ID_COLUMN};
use crate::predicate::{CompareOp, Predicate};
use crate::provider::{
    cancellable, CollectionMetadataProvider, NamedLocationCatalog, RowSource,
    StorageConnectionProvider, VersionCatalog,
};
use crate::sql::{SelectColumn, SelectQuery};
use crate::temporal::TemporalPredicateBuilder;
use crate::visibility::{current_snapshot, VersionVisibilityResolver};
use crate::writer::GeoJsonStreamWriter;

/// The only supported output format.
pub const GEOJSON_FORMAT: &str = "geojson";

/// A data query against one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    pub collection_id: String,
    /// Version to query; `None` for the current snapshot.
    pub instance_id: Option<String>,
    pub query: SpatialQuery,
    pub datetime: Option<String>,
    /// Field allow-list; empty means all data fields.
    pub parameter_names: Vec<String>,
    /// Informational only; results are returned in storage coordinates.
    pub crs: Option<String>,
    /// Output format, `geojson` when absent.
    pub format: Option<String>,
}

impl DataRequest {
    pub fn new(collection_id: impl Into<String>, query: SpatialQuery) -> Self {
        Self {
            collection_id: collection_id.into(),
            instance_id: None,
            query,
            datetime: None,
            parameter_names: Vec::new(),
            crs: None,
            format: None,
        }
    }

    pub fn with_instance(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_datetime(mut self, datetime: impl Into<String>) -> Self {
        self.datetime = Some(datetime.into());
        self
    }

    pub fn with_parameter_names(mut self, names: Vec<String>) -> Self {
        self.parameter_names = names;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// Item id listing for one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemsRequest {
    pub collection_id: String,
    pub bbox: Option<Vec<Option<f64>>>,
    pub datetime: Option<String>,
    pub instance_id: Option<String>,
}

/// Named-location listing for one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationsRequest {
    pub collection_id: String,
    /// Restricts the listing to cache entries inside the box; empty or
    /// absent means everywhere.
    pub bbox: Option<Vec<Option<f64>>>,
    /// Checked for syntax only; cache entries carry no date.
    pub datetime: Option<String>,
    pub instance_id: Option<String>,
}

/// Collection metadata resolved for a request.
struct Resolved {
    collection: Collection,
    location: Location,
    table: TableName,
}

/// Sequences metadata resolution, predicate composition and execution.
pub struct QueryOrchestrator {
    metadata: Arc<dyn CollectionMetadataProvider>,
    storage: Arc<dyn StorageConnectionProvider>,
    named_locations: Arc<dyn NamedLocationCatalog>,
    visibility: VersionVisibilityResolver,
    geometry: GeometryPredicateBuilder,
}

impl QueryOrchestrator {
    pub fn new(
        metadata: Arc<dyn CollectionMetadataProvider>,
        versions: Arc<dyn VersionCatalog>,
        storage: Arc<dyn StorageConnectionProvider>,
        named_locations: Arc<dyn NamedLocationCatalog>,
    ) -> Self {
        Self::with_config(
            metadata,
            versions,
            storage,
            named_locations,
            &EngineConfig::default(),
        )
    }

    pub fn with_config(
        metadata: Arc<dyn CollectionMetadataProvider>,
        versions: Arc<dyn VersionCatalog>,
        storage: Arc<dyn StorageConnectionProvider>,
        named_locations: Arc<dyn NamedLocationCatalog>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            metadata,
            storage,
            named_locations,
            visibility: VersionVisibilityResolver::new(versions),
            geometry: GeometryPredicateBuilder::new(config.default_srid, config.position_buffer_m),
        }
    }

    /// Run every step up to connection acquisition.
    ///
    /// Errors returned here happen before any output is produced.
    pub async fn prepare(
        &self,
        request: &DataRequest,
        cancel: &CancellationToken,
    ) -> EngineResult<PreparedQuery> {
        let query_type = request.query.query_type();
        counter!("edr_queries_total", "query_type" => query_type.as_str()).increment(1);

        let result = self.prepare_inner(request, cancel).await;
        if let Err(e) = &result {
            record_error(e);
        }
        result
    }

    async fn prepare_inner(
        &self,
        request: &DataRequest,
        cancel: &CancellationToken,
    ) -> EngineResult<PreparedQuery> {
        validate_format(request.format.as_deref())?;

        let resolved = self.resolve(&request.collection_id, cancel).await?;
        let fields = cancellable(cancel, self.metadata.data_fields(&resolved.collection)).await?;
        let columns = project_fields(&fields, &request.parameter_names);

        // Input validation precedes the version catalog lookup.
        let spatial = self.geometry.build(&request.query)?;
        let temporal = TemporalPredicateBuilder::build(
            request.datetime.as_deref(),
            resolved.collection.date_column.as_deref(),
        )?;
        let visibility = self
            .visibility
            .resolve(resolved.collection.id, request.instance_id.as_deref(), cancel)
            .await?;

        if let Some(crs) = request.crs.as_deref().filter(|c| !c.trim().is_empty()) {
            debug!(crs, "Ignoring requested crs; returning storage coordinates");
        }

        let filter = Predicate::all(
            std::iter::once(Predicate::spatial(GEOMETRY_COLUMN, spatial))
                .chain(temporal)
                .chain(std::iter::once(visibility)),
        );
        let query = SelectQuery::new(resolved.table, columns).with_filter(filter);

        let source = cancellable(cancel, self.storage.connect(&resolved.location)).await?;

        info!(
            collection_id = resolved.collection.id,
            query_type = request.query.query_type().as_str(),
            table = %query.table,
            "Prepared data query"
        );

        Ok(PreparedQuery {
            collection_id: resolved.collection.id,
            source,
            query,
        })
    }

    /// Prepare and stream in one call.
    pub async fn execute<W>(
        &self,
        request: &DataRequest,
        sink: W,
        cancel: &CancellationToken,
    ) -> EngineResult<usize>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.prepare(request, cancel).await?.stream(sink, cancel).await
    }

    /// Surrogate ids of visible rows within a bbox.
    pub async fn items(
        &self,
        request: &ItemsRequest,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<i64>> {
        counter!("edr_queries_total", "query_type" => "items").increment(1);

        let result = self.items_inner(request, cancel).await;
        if let Err(e) = &result {
            record_error(e);
        }
        result
    }

    async fn items_inner(
        &self,
        request: &ItemsRequest,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<i64>> {
        let resolved = self.resolve(&request.collection_id, cancel).await?;

        let spatial = self.geometry.cube(request.bbox.as_deref())?;
        let temporal = TemporalPredicateBuilder::build(
            request.datetime.as_deref(),
            resolved.collection.date_column.as_deref(),
        )?;
        let visibility = self
            .visibility
            .resolve(resolved.collection.id, request.instance_id.as_deref(), cancel)
            .await?;

        let filter = Predicate::all(
            std::iter::once(Predicate::spatial(GEOMETRY_COLUMN, spatial))
                .chain(temporal)
                .chain(std::iter::once(visibility)),
        );
        let query = SelectQuery::new(
            resolved.table,
            vec![SelectColumn::Column(ID_COLUMN.to_string())],
        )
        .with_filter(filter);

        let mut source = cancellable(cancel, self.storage.connect(&resolved.location)).await?;
        let mut rows = source.fetch(query);

        let mut ids = Vec::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                next = rows.next() => next,
            };
            let Some(row) = next else { break };
            match row?.id() {
                Some(id) => ids.push(id),
                None => warn!(collection_id = resolved.collection.id, "Skipping row without id"),
            }
        }

        info!(collection_id = resolved.collection.id, items = ids.len(), "Listed items");
        Ok(ids)
    }

    /// Prepare a query for one current row by surrogate id.
    ///
    /// An unknown id yields an empty collection, not an error.
    pub async fn prepare_item(
        &self,
        collection_id: &str,
        item_id: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<PreparedQuery> {
        counter!("edr_queries_total", "query_type" => "item").increment(1);

        let result = self.prepare_item_inner(collection_id, item_id, cancel).await;
        if let Err(e) = &result {
            record_error(e);
        }
        result
    }

    async fn prepare_item_inner(
        &self,
        collection_id: &str,
        item_id: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<PreparedQuery> {
        let resolved = self.resolve(collection_id, cancel).await?;

        let item: i64 = item_id
            .trim()
            .parse()
            .map_err(|_| EngineError::ItemNotFound(item_id.to_string()))?;

        let fields = cancellable(cancel, self.metadata.data_fields(&resolved.collection)).await?;
        let columns = project_fields(&fields, &[]);

        let filter = Predicate::all([
            Predicate::compare(ID_COLUMN, CompareOp::Eq, item),
            current_snapshot(),
        ]);
        let query = SelectQuery::new(resolved.table, columns).with_filter(filter);

        let source = cancellable(cancel, self.storage.connect(&resolved.location)).await?;

        debug!(collection_id = resolved.collection.id, item, "Prepared item query");
        Ok(PreparedQuery {
            collection_id: resolved.collection.id,
            source,
            query,
        })
    }

    /// Names of the locations cached for visible rows of a collection.
    pub async fn locations(
        &self,
        request: &LocationsRequest,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<String>> {
        counter!("edr_queries_total", "query_type" => "locations").increment(1);

        let result = self.locations_inner(request, cancel).await;
        if let Err(e) = &result {
            record_error(e);
        }
        result
    }

    async fn locations_inner(
        &self,
        request: &LocationsRequest,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<String>> {
        let collection = self.find_collection(&request.collection_id, cancel).await?;

        let spatial = match request.bbox.as_deref() {
            Some(bbox) if !bbox.is_empty() => Some(self.geometry.cube(Some(bbox))?),
            _ => None,
        };
        let temporal = TemporalPredicateBuilder::build(
            request.datetime.as_deref(),
            collection.date_column.as_deref(),
        )?;
        if temporal.is_some() {
            debug!(collection_id = collection.id, "Ignoring datetime for location listing");
        }
        let visibility = self
            .visibility
            .resolve(collection.id, request.instance_id.as_deref(), cancel)
            .await?;

        let filter = Predicate::all(
            spatial
                .map(|s| Predicate::spatial(GEOMETRY_COLUMN, s))
                .into_iter()
                .chain(std::iter::once(visibility)),
        );
        let names = cancellable(
            cancel,
            self.named_locations.location_names(collection.id, filter.as_ref()),
        )
        .await?;

        info!(collection_id = collection.id, locations = names.len(), "Listed locations");
        Ok(names)
    }

    /// Prepare a query for the visible rows cached against a named location.
    pub async fn prepare_location(
        &self,
        collection_id: &str,
        location_name: &str,
        instance_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> EngineResult<PreparedQuery> {
        counter!("edr_queries_total", "query_type" => "location").increment(1);

        let result = self
            .prepare_location_inner(collection_id, location_name, instance_id, cancel)
            .await;
        if let Err(e) = &result {
            record_error(e);
        }
        result
    }

    async fn prepare_location_inner(
        &self,
        collection_id: &str,
        location_name: &str,
        instance_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> EngineResult<PreparedQuery> {
        let resolved = self.resolve(collection_id, cancel).await?;

        let named = cancellable(cancel, self.named_locations.named_location(location_name))
            .await?
            .ok_or_else(|| EngineError::NamedLocationNotFound(location_name.to_string()))?;

        let fields = cancellable(cancel, self.metadata.data_fields(&resolved.collection)).await?;
        let columns = project_fields(&fields, &[]);

        let visibility = self
            .visibility
            .resolve(resolved.collection.id, instance_id, cancel)
            .await?;
        let row_ids = cancellable(
            cancel,
            self.named_locations
                .cached_row_ids(resolved.collection.id, named.id),
        )
        .await?;

        let filter = Predicate::all([Predicate::one_of(ID_COLUMN, row_ids), visibility]);
        let query = SelectQuery::new(resolved.table, columns).with_filter(filter);

        let source = cancellable(cancel, self.storage.connect(&resolved.location)).await?;

        debug!(
            collection_id = resolved.collection.id,
            location = %named.name,
            "Prepared named location query"
        );
        Ok(PreparedQuery {
            collection_id: resolved.collection.id,
            source,
            query,
        })
    }

    async fn find_collection(
        &self,
        collection_id: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<Collection> {
        let id: i32 = collection_id
            .trim()
            .parse()
            .map_err(|_| EngineError::CollectionNotFound(collection_id.to_string()))?;

        cancellable(cancel, self.metadata.collection(id))
            .await?
            .filter(|c| c.published)
            .ok_or_else(|| EngineError::CollectionNotFound(collection_id.to_string()))
    }

    async fn resolve(&self, collection_id: &str, cancel: &CancellationToken) -> EngineResult<Resolved> {
        let collection = self.find_collection(collection_id, cancel).await?;
        let id = collection.id;

        let location = cancellable(cancel, self.metadata.location(&collection))
            .await?
            .ok_or_else(|| EngineError::LocationNotFound(collection_id.to_string()))?;

        let table = cancellable(cancel, self.metadata.table_name(&collection, &location)).await?;

        debug!(collection_id = id, table = %table, "Resolved collection");
        Ok(Resolved {
            collection,
            location,
            table,
        })
    }
}

/// A query with its storage connection, ready to stream.
pub struct PreparedQuery {
    collection_id: i32,
    source: Box<dyn RowSource>,
    query: SelectQuery,
}

impl PreparedQuery {
    pub fn query(&self) -> &SelectQuery {
        &self.query
    }

    /// Execute the query and write the FeatureCollection to `sink`.
    ///
    /// Returns the number of features written. On error or cancellation the
    /// document is left unterminated.
    pub async fn stream<W>(mut self, sink: W, cancel: &CancellationToken) -> EngineResult<usize>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let start = Instant::now();
        let collection_id = self.collection_id;

        let rows = self.source.fetch(self.query);
        let result = GeoJsonStreamWriter::new(sink).write_all(rows, cancel).await;

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        histogram!("edr_stream_duration_ms").record(elapsed_ms);

        match &result {
            Ok(count) => info!(collection_id, features = count, elapsed_ms, "Streamed features"),
            Err(e) if e.is_cancelled() => {
                info!(collection_id, elapsed_ms, "Stream cancelled");
                record_error(e);
            }
            Err(e) => {
                tracing::error!(collection_id, error = %e, "Stream failed");
                record_error(e);
            }
        }
        result
    }
}

fn record_error(err: &EngineError) {
    counter!("edr_query_errors_total", "class" => err.class().as_str()).increment(1);
}

fn validate_format(format: Option<&str>) -> EngineResult<()> {
    match format.map(str::trim) {
        None | Some("") => Ok(()),
        Some(f) if f.eq_ignore_ascii_case(GEOJSON_FORMAT) => Ok(()),
        Some(f) => Err(EngineError::UnsupportedFormat(f.to_string())),
    }
}

/// Columns to select for a data query.
///
/// Data fields, optionally narrowed to `parameter_names`, with the surrogate
/// id forced first and the geometry forced as WKB.
pub fn project_fields(fields: &[Field], parameter_names: &[String]) -> Vec<SelectColumn> {
    let allowed: Vec<&str> = parameter_names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .collect();

    let mut columns: Vec<SelectColumn> = fields
        .iter()
        .filter(|f| f.include_in_data)
        .filter(|f| allowed.is_empty() || allowed.contains(&f.column_name.as_str()))
        .map(|f| {
            if f.column_name == GEOMETRY_COLUMN {
                SelectColumn::GeometryWkb(f.column_name.clone())
            } else {
                SelectColumn::Column(f.column_name.clone())
            }
        })
        .collect();

    columns.retain(|c| c.name() != ID_COLUMN);
    columns.insert(0, SelectColumn::Column(ID_COLUMN.to_string()));

    if !columns.iter().any(|c| c.name() == GEOMETRY_COLUMN) {
        columns.push(SelectColumn::GeometryWkb(GEOMETRY_COLUMN.to_string()));
    }

    columns
}
