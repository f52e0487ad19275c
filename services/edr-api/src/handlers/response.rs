//! Error responses and streamed GeoJSON bodies.

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use edr_protocol::{media_types, QueryParseError};
use futures::{stream, StreamExt};
use query_engine::{EngineError, EngineResult, PreparedQuery};
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Capacity of the pipe between the writer task and the response body.
const STREAM_BUFFER_BYTES: usize = 64 * 1024;

/// An engine error raised before streaming starts.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl From<QueryParseError> for ApiError {
    fn from(err: QueryParseError) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = self.0.to_error_response();
        let status = StatusCode::from_u16(body.response_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        debug!(status = status.as_u16(), error = %self.0, "Request failed");
        (status, Json(body)).into_response()
    }
}

/// Stream a prepared query as the response body.
///
/// The query runs on its own task writing into a pipe; the body reads the
/// other end. Dropping the body (client gone) cancels the token, which stops
/// the writer at its next suspend point. A failure after the status line has
/// gone out ends the body with an error, so the client sees an aborted
/// transfer rather than a short document.
pub fn geojson_stream(prepared: PreparedQuery) -> Response {
    let cancel = CancellationToken::new();
    let (writer, reader) = tokio::io::duplex(STREAM_BUFFER_BYTES);
    let (done_tx, done_rx) = oneshot::channel();

    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        // The writer half is dropped before the outcome is sent, so the
        // reader reaches EOF first.
        let result = prepared.stream(writer, &task_cancel).await;
        let _ = done_tx.send(result);
    });

    let outcome = stream::once(done_rx).filter_map(|result| async move {
        stream_failure(result.ok()).map(Err)
    });

    let guard = cancel.drop_guard();
    let body = ReaderStream::new(reader).chain(outcome).map(move |chunk| {
        let _guard = &guard;
        chunk
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, media_types::GEO_JSON)],
        Body::from_stream(body),
    )
        .into_response()
}

/// The body error for a finished stream, if it did not complete.
///
/// `None` as input means the writer task ended without reporting.
fn stream_failure(outcome: Option<EngineResult<usize>>) -> Option<std::io::Error> {
    match outcome {
        Some(Ok(_)) => None,
        // Only reachable once the body is gone.
        Some(Err(EngineError::Cancelled)) => None,
        Some(Err(e)) => Some(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())),
        None => Some(std::io::Error::new(
            std::io::ErrorKind::Other,
            "feature stream ended without a result",
        )),
    }
}
