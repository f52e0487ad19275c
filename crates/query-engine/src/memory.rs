//! In-process collaborators.
//!
//! [`InMemoryCatalog`] serves metadata, versions and rows from maps held in
//! memory, evaluating the predicate tree with [`Predicate::matches`]. Used by
//! tests and benchmarks that should not need a database.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::error::{EngineError, EngineResult};
use crate::model::{
    Collection, Field, FieldValue, Location, NamedLocation, Row, TableName,
    CREATED_VERSION_COLUMN, DELETED_VERSION_COLUMN, GEOMETRY_COLUMN,
};
use crate::predicate::Predicate;
use crate::provider::{
    CollectionMetadataProvider, NamedLocationCatalog, RowSource, RowStream,
    StorageConnectionProvider, VersionCatalog,
};
use crate::sql::SelectQuery;

type Tables = HashMap<TableName, Vec<Row>>;

/// A collection row cached against a named location.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationCacheEntry {
    pub collection_id: i32,
    pub location_id: i32,
    pub row_id: i64,
    /// Well-known binary.
    pub geometry: Option<Vec<u8>>,
    pub created_version: Option<i64>,
    pub deleted_version: Option<i64>,
}

impl LocationCacheEntry {
    /// The entry as a row, for predicate evaluation.
    fn as_row(&self) -> Row {
        Row::new()
            .with(GEOMETRY_COLUMN, FieldValue::from(self.geometry.clone()))
            .with(CREATED_VERSION_COLUMN, FieldValue::from(self.created_version))
            .with(DELETED_VERSION_COLUMN, FieldValue::from(self.deleted_version))
    }
}

/// Metadata, version catalog and row storage in one in-memory value.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    collections: HashMap<i32, Collection>,
    locations: HashMap<i32, Location>,
    fields: HashMap<i32, Vec<Field>>,
    versions: HashMap<i32, BTreeSet<i32>>,
    tables: Arc<Tables>,
    named_locations: HashMap<i32, NamedLocation>,
    location_cache: Vec<LocationCacheEntry>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, collection: Collection) -> Self {
        self.collections.insert(collection.id, collection);
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.locations.insert(location.id, location);
        self
    }

    pub fn with_fields(mut self, collection_id: i32, fields: Vec<Field>) -> Self {
        self.fields.insert(collection_id, fields);
        self
    }

    pub fn with_versions(mut self, collection_id: i32, versions: impl IntoIterator<Item = i32>) -> Self {
        self.versions
            .entry(collection_id)
            .or_default()
            .extend(versions);
        self
    }

    /// Add rows to a table, creating it if needed.
    pub fn with_rows(mut self, table: TableName, rows: impl IntoIterator<Item = Row>) -> Self {
        Arc::make_mut(&mut self.tables)
            .entry(table)
            .or_default()
            .extend(rows);
        self
    }

    pub fn with_named_location(mut self, id: i32, name: impl Into<String>) -> Self {
        self.named_locations.insert(
            id,
            NamedLocation {
                id,
                name: name.into(),
            },
        );
        self
    }

    pub fn with_cached_row(mut self, entry: LocationCacheEntry) -> Self {
        self.location_cache.push(entry);
        self
    }
}

#[async_trait]
impl CollectionMetadataProvider for InMemoryCatalog {
    async fn collection(&self, id: i32) -> EngineResult<Option<Collection>> {
        Ok(self.collections.get(&id).filter(|c| c.published).cloned())
    }

    async fn location(&self, collection: &Collection) -> EngineResult<Option<Location>> {
        Ok(self.locations.get(&collection.location_id).cloned())
    }

    async fn data_fields(&self, collection: &Collection) -> EngineResult<Vec<Field>> {
        Ok(self.fields.get(&collection.id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl VersionCatalog for InMemoryCatalog {
    async fn versions(&self, collection_id: i32) -> EngineResult<BTreeSet<i32>> {
        Ok(self.versions.get(&collection_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl NamedLocationCatalog for InMemoryCatalog {
    async fn named_location(&self, name: &str) -> EngineResult<Option<NamedLocation>> {
        Ok(self
            .named_locations
            .values()
            .find(|l| l.name == name)
            .cloned())
    }

    async fn location_names(
        &self,
        collection_id: i32,
        filter: Option<&Predicate>,
    ) -> EngineResult<Vec<String>> {
        let names: BTreeSet<&str> = self
            .location_cache
            .iter()
            .filter(|e| e.collection_id == collection_id)
            .filter(|e| filter.map_or(true, |f| f.matches(&e.as_row())))
            .filter_map(|e| self.named_locations.get(&e.location_id))
            .map(|l| l.name.as_str())
            .collect();
        Ok(names.into_iter().map(String::from).collect())
    }

    async fn cached_row_ids(&self, collection_id: i32, location_id: i32) -> EngineResult<Vec<i64>> {
        Ok(self
            .location_cache
            .iter()
            .filter(|e| e.collection_id == collection_id && e.location_id == location_id)
            .map(|e| e.row_id)
            .collect())
    }
}

#[async_trait]
impl StorageConnectionProvider for InMemoryCatalog {
    async fn connect(&self, _location: &Location) -> EngineResult<Box<dyn RowSource>> {
        Ok(Box::new(MemoryRowSource {
            tables: Arc::clone(&self.tables),
        }))
    }
}

/// Row source over in-memory tables.
pub struct MemoryRowSource {
    tables: Arc<Tables>,
}

impl RowSource for MemoryRowSource {
    fn fetch(&mut self, query: SelectQuery) -> RowStream<'_> {
        let Some(rows) = self.tables.get(&query.table) else {
            let err = EngineError::storage(format!("relation \"{}\" does not exist", query.table));
            return stream::once(async move { Err(err) }).boxed();
        };

        let SelectQuery {
            columns, filter, ..
        } = query;

        stream::iter(rows.iter())
            .filter(move |row| {
                let keep = filter.as_ref().map_or(true, |f| f.matches(row));
                async move { keep }
            })
            .map(move |row| -> EngineResult<Row> {
                if columns.is_empty() {
                    return Ok(row.clone());
                }
                Ok(columns
                    .iter()
                    .map(|column| {
                        let name = column.name();
                        let value = row.get(name).cloned().unwrap_or(FieldValue::Null);
                        (name.to_string(), value)
                    })
                    .collect())
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DELETED_VERSION_COLUMN, ID_COLUMN};
    use crate::predicate::Predicate;
    use crate::sql::SelectColumn;

    fn table() -> TableName {
        TableName::new("data", "rs_1")
    }

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new().with_rows(
            table(),
            vec![
                Row::new().with(ID_COLUMN, 1i64).with("name", "a"),
                Row::new()
                    .with(ID_COLUMN, 2i64)
                    .with("name", "b")
                    .with(DELETED_VERSION_COLUMN, 3i64),
            ],
        )
    }

    #[tokio::test]
    async fn test_fetch_filters_and_projects() {
        let mut source = MemoryRowSource {
            tables: catalog().tables,
        };
        let query = SelectQuery::new(table(), vec![SelectColumn::Column(ID_COLUMN.to_string())])
            .with_filter(Some(Predicate::is_null(DELETED_VERSION_COLUMN)));

        let rows: Vec<Row> = source
            .fetch(query)
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(rows, vec![Row::new().with(ID_COLUMN, 1i64)]);
    }

    #[tokio::test]
    async fn test_fetch_missing_table() {
        let mut source = MemoryRowSource {
            tables: catalog().tables,
        };
        let query = SelectQuery::new(TableName::new("data", "nope"), Vec::new());
        let results: Vec<_> = source.fetch(query).collect().await;

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(EngineError::Storage(_))));
    }

    fn cached(location_id: i32, row_id: i64, deleted: Option<i64>) -> LocationCacheEntry {
        LocationCacheEntry {
            collection_id: 1,
            location_id,
            row_id,
            geometry: None,
            created_version: Some(1),
            deleted_version: deleted,
        }
    }

    #[tokio::test]
    async fn test_named_location_cache() {
        let catalog = InMemoryCatalog::new()
            .with_named_location(10, "Exeter")
            .with_named_location(11, "Crediton")
            .with_cached_row(cached(10, 1, None))
            .with_cached_row(cached(10, 2, None))
            .with_cached_row(cached(11, 3, Some(2)));

        assert_eq!(
            catalog.location_names(1, None).await.unwrap(),
            vec!["Crediton", "Exeter"]
        );

        let current = Predicate::is_null(DELETED_VERSION_COLUMN);
        assert_eq!(catalog.location_names(1, Some(&current)).await.unwrap(), vec!["Exeter"]);
        assert!(catalog.location_names(2, None).await.unwrap().is_empty());

        assert_eq!(catalog.cached_row_ids(1, 10).await.unwrap(), vec![1, 2]);
        assert_eq!(
            catalog.named_location("Crediton").await.unwrap().map(|l| l.id),
            Some(11)
        );
        assert_eq!(catalog.named_location("crediton").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unpublished_collection_hidden() {
        let catalog = InMemoryCatalog::new().with_collection(Collection {
            id: 5,
            name: "Draft".to_string(),
            table_name: None,
            location_id: 1,
            date_column: None,
            published: false,
        });
        assert_eq!(catalog.collection(5).await.unwrap(), None);
    }
}
