//! Error types for the query engine.

use edr_protocol::{ErrorDetail, ErrorResponse};
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Boxed error from a storage collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Broad classification of engine failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request itself is malformed.
    InputValidation,
    /// A referenced collection, location, instance or item does not exist.
    ResourceNotFound,
    /// Storage or output failure. Fatal for the request.
    Storage,
    /// The request was abandoned.
    Cancelled,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::InputValidation => "input_validation",
            ErrorClass::ResourceNotFound => "resource_not_found",
            ErrorClass::Storage => "storage",
            ErrorClass::Cancelled => "cancelled",
        }
    }
}

/// Errors that can occur while building or executing a query.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unable to parse Well Known Text: {0}")]
    InvalidGeometry(String),

    #[error("Unknown units: {0}")]
    UnknownUnit(String),

    #[error("Invalid distance: {0}")]
    InvalidDistance(String),

    #[error("BBOX value missing")]
    MissingBoundingBoxValue,

    #[error("Number of bbox parameters is incorrect: expected 4 or 6, got {0}")]
    InvalidBoundingBoxLength(usize),

    #[error("Number of date parameters is incorrect: {0}")]
    InvalidDateRange(String),

    #[error("Resolution parameters are not supported")]
    UnsupportedResolution,

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid parameter {param}: {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Location not found for collection {0}")]
    LocationNotFound(String),

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Named location not found: {0}")]
    NamedLocationNotFound(String),

    /// Failure reported by a storage collaborator, passed through untouched.
    #[error("Storage error: {0}")]
    Storage(#[source] BoxError),

    /// A row that cannot be turned into a feature.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// Writing to the output sink failed.
    #[error("Output error: {0}")]
    Output(#[from] std::io::Error),

    #[error("Request cancelled")]
    Cancelled,
}

impl EngineError {
    /// Wrap a storage collaborator error.
    pub fn storage<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        EngineError::Storage(err.into())
    }

    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::InvalidGeometry(_)
            | EngineError::UnknownUnit(_)
            | EngineError::InvalidDistance(_)
            | EngineError::MissingBoundingBoxValue
            | EngineError::InvalidBoundingBoxLength(_)
            | EngineError::InvalidDateRange(_)
            | EngineError::UnsupportedResolution
            | EngineError::UnsupportedFormat(_)
            | EngineError::InvalidParameter { .. } => ErrorClass::InputValidation,
            EngineError::CollectionNotFound(_)
            | EngineError::LocationNotFound(_)
            | EngineError::InstanceNotFound(_)
            | EngineError::ItemNotFound(_)
            | EngineError::NamedLocationNotFound(_) => ErrorClass::ResourceNotFound,
            EngineError::Storage(_) | EngineError::CorruptRow(_) | EngineError::Output(_) => {
                ErrorClass::Storage
            }
            EngineError::Cancelled => ErrorClass::Cancelled,
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self.class() {
            ErrorClass::InputValidation => 400,
            ErrorClass::ResourceNotFound => 404,
            ErrorClass::Storage => 500,
            // Client closed request; never actually sent.
            ErrorClass::Cancelled => 499,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }

    /// The error list entry reported to the client.
    pub fn to_error_detail(&self) -> ErrorDetail {
        match self {
            EngineError::InvalidGeometry(_) => {
                ErrorDetail::bad_request("Unable to parse Well Known Text").with_source("coords")
            }
            EngineError::UnknownUnit(_) => ErrorDetail::bad_request("Invalid request: Unknown units")
                .with_source("units")
                .with_source_id("ConvertDistance"),
            EngineError::InvalidDistance(msg) => {
                ErrorDetail::bad_request(format!("Invalid distance: {}", msg)).with_source("within")
            }
            EngineError::MissingBoundingBoxValue => {
                ErrorDetail::bad_request("BBOX Value missing").with_source("bbox")
            }
            EngineError::InvalidBoundingBoxLength(_) => {
                ErrorDetail::bad_request("Number of bbox parameters is incorrect").with_source("bbox")
            }
            EngineError::InvalidDateRange(_) => {
                ErrorDetail::bad_request("Number of date parameters is incorrect")
                    .with_source("datetime")
            }
            EngineError::UnsupportedResolution => {
                ErrorDetail::bad_request("Resolution parameters not supported")
                    .with_source("resolution-x")
            }
            EngineError::UnsupportedFormat(_) => ErrorDetail::bad_request("Invalid format")
                .with_source("f")
                .with_source_id("HandleDataQuery"),
            EngineError::InvalidParameter { param, message } => {
                ErrorDetail::bad_request(message.clone()).with_source(param.clone())
            }
            EngineError::CollectionNotFound(_) => ErrorDetail::not_found("Collection not found")
                .with_source("id")
                .with_source_id("recordset"),
            EngineError::LocationNotFound(_) => ErrorDetail::not_found("Location not found")
                .with_source("location")
                .with_source_id("recordset"),
            EngineError::InstanceNotFound(_) => ErrorDetail::not_found("Instance not found")
                .with_source("VersionId")
                .with_source_id("recordset"),
            EngineError::ItemNotFound(_) => ErrorDetail::not_found("Item not found")
                .with_source("itemId")
                .with_source_id("recordset"),
            EngineError::NamedLocationNotFound(_) => {
                ErrorDetail::not_found("Named Location not found")
                    .with_source("Name")
                    .with_source_id("OgcLocation")
            }
            EngineError::Storage(_) | EngineError::CorruptRow(_) | EngineError::Output(_) => {
                ErrorDetail::internal_error("Internal server error")
            }
            EngineError::Cancelled => ErrorDetail::new(499, "Request cancelled"),
        }
    }

    /// Convert to the error list returned at the HTTP boundary.
    pub fn to_error_response(&self) -> ErrorResponse {
        self.to_error_detail().into()
    }
}

impl From<edr_protocol::QueryParseError> for EngineError {
    fn from(err: edr_protocol::QueryParseError) -> Self {
        EngineError::InvalidParameter {
            param: err.param().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(EngineError::InvalidGeometry("x".into()).status_code(), 400);
        assert_eq!(EngineError::UnknownUnit("parsecs".into()).status_code(), 400);
        assert_eq!(EngineError::InvalidBoundingBoxLength(3).status_code(), 400);
        assert_eq!(EngineError::CollectionNotFound("9".into()).status_code(), 404);
        assert_eq!(EngineError::InstanceNotFound("7".into()).status_code(), 404);
        assert_eq!(EngineError::CorruptRow("no geometry".into()).status_code(), 500);
    }

    #[test]
    fn test_cancelled_is_its_own_class() {
        let err = EngineError::Cancelled;
        assert_eq!(err.class(), ErrorClass::Cancelled);
        assert!(err.is_cancelled());
        assert!(!EngineError::MissingBoundingBoxValue.is_cancelled());
    }

    #[test]
    fn test_storage_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "connection reset");
        let err = EngineError::storage(io);
        assert_eq!(err.class(), ErrorClass::Storage);

        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "connection reset");
    }

    #[test]
    fn test_error_detail_fields() {
        let detail = EngineError::InstanceNotFound("abc".into()).to_error_detail();
        assert_eq!(detail.status_code, 404);
        assert_eq!(detail.description, "Instance not found");
        assert_eq!(detail.source.as_deref(), Some("VersionId"));

        let detail = EngineError::UnsupportedFormat("csv".into()).to_error_detail();
        assert_eq!(detail.source.as_deref(), Some("f"));

        let detail = EngineError::NamedLocationNotFound("EGLL".into()).to_error_detail();
        assert_eq!(detail.status_code, 404);
        assert_eq!(detail.description, "Named Location not found");
        assert_eq!(detail.source_id.as_deref(), Some("OgcLocation"));
    }

    #[test]
    fn test_storage_details_are_not_leaked() {
        let err = EngineError::storage(std::io::Error::new(
            std::io::ErrorKind::Other,
            "password authentication failed",
        ));
        let detail = err.to_error_detail();
        assert!(!detail.description.contains("password"));
    }

    #[test]
    fn test_query_parse_error_conversion() {
        let parse_err = edr_protocol::queries::parse_bbox("1,a").unwrap_err();
        let err: EngineError = parse_err.into();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.to_error_detail().source.as_deref(), Some("bbox"));
    }
}
