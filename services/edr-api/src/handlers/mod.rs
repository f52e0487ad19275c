//! HTTP request handlers for the EDR API.

pub mod data;
pub mod health;
pub mod items;
pub mod locations;
pub mod response;

pub use response::ApiError;
