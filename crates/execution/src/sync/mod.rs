//! Connection, routing and configuration plumbing of a network listener.
//!
//! Provides:
//! - A connection manager with heartbeats and bounded exponential backoff
//! - An event router that decodes logs and isolates handler failures
//! - A config watcher that turns address changes into rebinds

mod backoff;
mod config_watcher;
mod connection;
mod liveness;
mod router;

pub use backoff::*;
pub use config_watcher::*;
pub use connection::*;
pub use liveness::*;
pub use router::*;
