//! HTTP surface and trigger monitor for the letter workflow engine

pub mod api;
pub mod error;
pub mod monitor;

pub use api::router;
pub use error::ApiError;
