//! Collaborator interfaces consumed by the orchestrator.
//!
//! Metadata, version catalog and row storage are implemented outside the
//! engine: `storage` provides PostgreSQL versions and [`crate::memory`]
//! provides in-process ones.

use std::collections::BTreeSet;
use std::future::Future;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};
use crate::model::{Collection, Field, Location, NamedLocation, Row, TableName};
use crate::predicate::Predicate;
use crate::sql::SelectQuery;

/// Resolves collection metadata.
#[async_trait]
pub trait CollectionMetadataProvider: Send + Sync {
    /// A published collection by id, or `None`.
    async fn collection(&self, id: i32) -> EngineResult<Option<Collection>>;

    /// Storage location of a collection, or `None`.
    async fn location(&self, collection: &Collection) -> EngineResult<Option<Location>>;

    /// Physical table holding the collection rows.
    async fn table_name(
        &self,
        collection: &Collection,
        location: &Location,
    ) -> EngineResult<TableName> {
        Ok(location.table_name_for(collection))
    }

    /// All fields of a collection, in column order.
    async fn data_fields(&self, collection: &Collection) -> EngineResult<Vec<Field>>;
}

/// Lists the versions (instances) of a collection.
#[async_trait]
pub trait VersionCatalog: Send + Sync {
    async fn versions(&self, collection_id: i32) -> EngineResult<BTreeSet<i32>>;
}

/// Named locations and the cache linking them to collection rows.
///
/// Cache entries carry the version columns and a geometry under the same
/// names as collection rows, so visibility and spatial predicates apply to
/// them unchanged.
#[async_trait]
pub trait NamedLocationCatalog: Send + Sync {
    /// A named location by exact name, or `None`.
    async fn named_location(&self, name: &str) -> EngineResult<Option<NamedLocation>>;

    /// Sorted distinct names of the locations with a cache entry for the
    /// collection matching `filter`.
    async fn location_names(
        &self,
        collection_id: i32,
        filter: Option<&Predicate>,
    ) -> EngineResult<Vec<String>>;

    /// Surrogate ids of the collection rows cached against a location.
    async fn cached_row_ids(&self, collection_id: i32, location_id: i32) -> EngineResult<Vec<i64>>;
}

/// Lazy stream of rows borrowed from a row source.
pub type RowStream<'a> = BoxStream<'a, EngineResult<Row>>;

/// A connection able to execute one query at a time.
pub trait RowSource: Send {
    /// Execute `query` and stream matching rows in storage order.
    fn fetch(&mut self, query: SelectQuery) -> RowStream<'_>;
}

/// Opens row sources for storage locations.
#[async_trait]
pub trait StorageConnectionProvider: Send + Sync {
    async fn connect(&self, location: &Location) -> EngineResult<Box<dyn RowSource>>;
}

/// Run `future` unless `cancel` fires first.
///
/// A cancellation that is already pending wins over a ready future.
pub async fn cancellable<T, F>(cancel: &CancellationToken, future: F) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        result = future => result,
    }
}
