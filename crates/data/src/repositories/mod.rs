//! PostgreSQL implementations of the store and the config feed.
//!
//! Confirmations use a `version` column for compare-and-swap; stats and
//! lifecycle documents are JSONB objects merged with `||`. Config changes are
//! pushed through `LISTEN/NOTIFY` on the `contract_config_changed` channel.

mod config_repository;
mod state_repository;

pub use config_repository::{CONFIG_CHANNEL, PgConfigFeed};
pub use state_repository::PgStateStore;

use sqlx::PgPool;
use std::sync::Arc;

/// Database connection wrapper for repositories.
#[derive(Clone)]
pub struct Database {
    pool: Arc<PgPool>,
}

impl Database {
    /// Creates a new Database wrapper from a connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Creates a new database connection from a connection string.
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    ///
    /// # Errors
    /// Returns an error if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates a [`PgStateStore`] on this pool.
    #[must_use]
    pub fn state_store(&self) -> PgStateStore {
        PgStateStore::new(self.pool.clone())
    }

    /// Creates a [`PgConfigFeed`] on this pool.
    #[must_use]
    pub fn config_feed(&self) -> PgConfigFeed {
        PgConfigFeed::new(self.pool.clone())
    }

    /// Creates the schema if it does not exist yet.
    ///
    /// # Errors
    /// Returns an error if migrations fail.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(include_str!("../../migrations/001_initial_schema.sql"))
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }
}
