//! Structured error list returned to EDR clients.
//!
//! Validation and lookup failures are reported as a JSON array of
//! [`ErrorDetail`] entries. The HTTP status of the response is the most
//! common status among the entries (see [`ErrorResponse::response_code`]).

use serde::{Deserialize, Serialize};

/// A single error entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    /// HTTP status equivalent of this entry.
    pub status_code: u16,

    /// Human readable description.
    pub description: String,

    /// Request field the error relates to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Component or entity that raised the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

impl ErrorDetail {
    /// Create a new entry.
    pub fn new(status_code: u16, description: impl Into<String>) -> Self {
        Self {
            status_code,
            description: description.into(),
            source: None,
            source_id: None,
        }
    }

    /// Create a 400 Bad Request entry.
    pub fn bad_request(description: impl Into<String>) -> Self {
        Self::new(400, description)
    }

    /// Create a 404 Not Found entry.
    pub fn not_found(description: impl Into<String>) -> Self {
        Self::new(404, description)
    }

    /// Create a 500 Internal Server Error entry.
    pub fn internal_error(description: impl Into<String>) -> Self {
        Self::new(500, description)
    }

    /// Set the request field.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the source id.
    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }
}

/// A list of error entries, serialized as a plain JSON array.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

impl ErrorResponse {
    /// Create an empty error list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry.
    pub fn with_error(mut self, detail: ErrorDetail) -> Self {
        self.errors.push(detail);
        self
    }

    /// Add an entry in place.
    pub fn push(&mut self, detail: ErrorDetail) {
        self.errors.push(detail);
    }

    /// Whether any entries have been recorded.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ErrorDetail] {
        &self.errors
    }

    /// The most common status code among the entries.
    ///
    /// Ties go to the status that appears first in the list. An empty list
    /// reports 500.
    pub fn response_code(&self) -> u16 {
        let mut counts: Vec<(u16, usize)> = Vec::new();
        for detail in &self.errors {
            match counts.iter_mut().find(|(code, _)| *code == detail.status_code) {
                Some((_, count)) => *count += 1,
                None => counts.push((detail.status_code, 1)),
            }
        }

        let mut best: Option<(u16, usize)> = None;
        for (code, count) in counts {
            if best.map_or(true, |(_, best_count)| count > best_count) {
                best = Some((code, count));
            }
        }

        best.map(|(code, _)| code).unwrap_or(500)
    }
}

impl From<ErrorDetail> for ErrorResponse {
    fn from(detail: ErrorDetail) -> Self {
        Self::new().with_error(detail)
    }
}

impl FromIterator<ErrorDetail> for ErrorResponse {
    fn from_iter<I: IntoIterator<Item = ErrorDetail>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}
