//! Storage errors and their mapping onto engine errors.

use query_engine::EngineError;
use thiserror::Error;
use tracing::warn;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unsupported storage provider: {0}")]
    UnsupportedProvider(String),

    #[error("Invalid connection details for location {location_id}: {message}")]
    InvalidDetails { location_id: i32, message: String },
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        if let StorageError::Database(sqlx::Error::Database(db)) = &err {
            if is_geometry_failure(db.message()) {
                warn!(error = %db, "Database rejected query geometry");
                return EngineError::InvalidGeometry(db.message().to_string());
            }
        }
        EngineError::storage(err)
    }
}

/// Convert a sqlx error into an engine error.
pub fn db_error(err: sqlx::Error) -> EngineError {
    StorageError::Database(err).into()
}

/// Whether a database error message reports an unparseable geometry.
///
/// Geometries are validated before reaching the database; this only catches
/// what PostGIS rejects on top of that (e.g. geography out of range).
pub fn is_geometry_failure(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("geography")
        || message.contains("invalid geometry")
        || message.contains("parse error")
        || message.contains("wkb")
}
