//! External collaborators of the listener.
//!
//! The listener reads its contract binding from a [`ConfigFeed`] and writes
//! confirmations, stats and game lifecycle documents to a [`StateStore`].
//! Both come in an in-memory flavour, used by tests and database-less runs,
//! and a PostgreSQL flavour under [`repositories`].

pub mod error;
pub mod feed;
pub mod lifecycle;
pub mod memory;
pub mod repositories;
pub mod store;

pub use error::StoreError;
pub use feed::{ConfigDocument, ConfigFeed, ConfigStream};
pub use lifecycle::{EndReason, GameStatus, LifecycleUpdate};
pub use memory::{MemoryConfigFeed, MemoryStateStore};
pub use repositories::{Database, PgConfigFeed, PgStateStore};
pub use store::{MAX_TRANSACT_ATTEMPTS, StateStore, Versioned, transact_confirmation};
