//! HTTP surface

pub mod error;
pub mod handlers;
pub mod routes;
pub mod sse;
pub mod tenant;
pub mod validate;

pub use routes::{create_router, AppState};
