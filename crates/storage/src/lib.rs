//! PostgreSQL/PostGIS collaborators for the EDR query engine.
//!
//! Provides:
//! - [`PgCatalog`] for collection metadata and version lookups
//! - [`PgConnectionProvider`] for row storage connections
//! - Row decoding and database error mapping

pub mod catalog;
pub mod connection;
pub mod error;
pub mod rows;

pub use catalog::PgCatalog;
pub use connection::{ConnectionDetails, PgConnectionProvider, PgRowSource};
pub use error::{db_error, StorageError, StorageResult};
pub use rows::{decode_row, ColumnKind};
