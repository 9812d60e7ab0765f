//! Prelude module for convenient imports.
//!
//! This module re-exports the most commonly used types from the crate.
//!
//! # Example
//!
//! ```rust
//! use chainwatch_execution::prelude::*;
//! ```

// Confirmation
pub use crate::confirmation::{
    ConfirmationHandle, ConfirmationOutcome, ConfirmerConfig, PendingConfirmation,
    TransactionConfirmer,
};

// Context
pub use crate::context::{ListenerContext, ListenerParts, ListenerSettings, ListenerStatus};

// Errors
pub use crate::error::ListenerError;

// Handlers
pub use crate::handlers::{
    DEFAULT_ROUTES, EventHandler, GameLifecycleHandler, HandlerTable, QueryFeePaidHandler,
    StatsHandler, default_table,
};

// Sync
pub use crate::sync::{
    Backoff, ConfigWatcher, Connection, ConnectionConfig, ConnectionManager, EventRouter,
    LivenessMarker, candidate_binding,
};
