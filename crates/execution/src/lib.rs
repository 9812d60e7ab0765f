//! Contract event listener.
//!
//! This crate keeps one network's listener running:
//! - Node connection with heartbeat and exponential reconnect
//! - Config watching and contract rebinding
//! - Event routing to typed handlers
//! - Transaction confirmation by push/poll race
//! - Per-network wiring in [`context::ListenerContext`]

/// Prelude module for convenient imports.
pub mod prelude;

/// Transaction confirmation.
pub mod confirmation;
/// Per-network listener wiring.
pub mod context;
/// Listener errors.
pub mod error;
/// Event handlers.
pub mod handlers;
/// Connection, config and routing.
pub mod sync;

#[cfg(test)]
mod test_support;
