//! Spatio-temporal query engine for EDR collections.
//!
//! Turns EDR data queries (position, radius, area, cube, trajectory,
//! corridor) into a predicate over a versioned table, runs it against a
//! storage collaborator and streams the matching rows out as a GeoJSON
//! FeatureCollection.
//!
//! - [`geometry`], [`temporal`], [`visibility`]: predicate builders
//! - [`predicate`], [`sql`]: the predicate tree and its PostGIS translation
//! - [`orchestrator`]: the request pipeline
//! - [`writer`]: streaming GeoJSON output
//! - [`provider`]: collaborator traits, with [`memory`] implementations

pub mod config;
pub mod error;
pub mod geometry;
pub mod memory;
pub mod model;
pub mod orchestrator;
pub mod predicate;
pub mod provider;
pub mod sql;
pub mod temporal;
pub mod visibility;
pub mod writer;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, ErrorClass};
pub use geometry::{GeometryPredicateBuilder, QueryGeometry, SpatialPredicate, SpatialQuery};
pub use memory::{InMemoryCatalog, LocationCacheEntry};
pub use model::{Collection, Field, FieldValue, Location, NamedLocation, Row, TableName};
pub use orchestrator::{
    DataRequest, ItemsRequest, LocationsRequest, PreparedQuery, QueryOrchestrator,
};
pub use predicate::{CompareOp, Predicate};
pub use provider::{
    CollectionMetadataProvider, NamedLocationCatalog, RowSource, RowStream,
    StorageConnectionProvider, VersionCatalog,
};
pub use sql::{CompiledQuery, SelectColumn, SelectQuery};
pub use temporal::{TemporalPredicateBuilder, TemporalQuery};
pub use visibility::VersionVisibilityResolver;
pub use writer::GeoJsonStreamWriter;
