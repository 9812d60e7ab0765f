//! HTTP surface of the listener.
//!
//! This crate serves:
//! - A plain text banner on `/`
//! - A liveness probe on `/healthz`
//! - A read-only listener status document on `/status`

/// Error types.
pub mod error;
/// Route definitions and handlers.
pub mod routes;
/// Server configuration and startup.
pub mod server;

pub use error::ApiError;
pub use routes::{BANNER, StatusProvider, router};
pub use server::{ApiServer, ServerConfig};
