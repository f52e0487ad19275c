//! EDR API Service Library
//!
//! HTTP front end for the EDR query engine: data queries, item lookups and
//! named-location lookups over published collections, answered as streamed
//! GeoJSON.

pub mod config;
pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::router;
pub use state::AppState;
