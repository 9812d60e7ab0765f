//! Confirmation, stats and lifecycle persistence.

use crate::error::StoreError;
use crate::lifecycle::LifecycleUpdate;
use crate::store::{StateStore, Versioned};
use async_trait::async_trait;
use chainwatch_domain::{ConfirmationRecord, Network, ReceiptStatus};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::debug;

fn confirmation_from_row(row: &PgRow) -> Result<Versioned<ConfirmationRecord>, StoreError> {
    let status: String = row.try_get("receipt_status")?;
    let version: i64 = row.try_get("version")?;
    Ok(Versioned {
        value: ConfirmationRecord {
            query_id: row.try_get("query_id")?,
            transaction_hash: row.try_get("transaction_hash")?,
            receipt_status: status
                .parse::<ReceiptStatus>()
                .map_err(StoreError::Serialization)?,
            last_modified_at: row.try_get("last_modified_at")?,
        },
        version: u64::try_from(version)
            .map_err(|_| StoreError::Serialization(format!("negative version {version}")))?,
    })
}

/// [`StateStore`] over PostgreSQL.
#[derive(Clone)]
pub struct PgStateStore {
    pool: Arc<PgPool>,
}

impl PgStateStore {
    /// Creates a new PgStateStore.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn load_confirmation(
        &self,
        network: Network,
        query_id: &str,
    ) -> Result<Option<Versioned<ConfirmationRecord>>, StoreError> {
        let row = sqlx::query("SELECT * FROM confirmations WHERE network = $1 AND query_id = $2")
            .bind(network.as_str())
            .bind(query_id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        row.as_ref().map(confirmation_from_row).transpose()
    }

    async fn store_confirmation(
        &self,
        network: Network,
        query_id: &str,
        expected_version: Option<u64>,
        record: ConfirmationRecord,
    ) -> Result<u64, StoreError> {
        let result = match expected_version {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO confirmations
                        (network, query_id, transaction_hash, receipt_status, last_modified_at, version)
                    VALUES ($1, $2, $3, $4, $5, 1)
                    ON CONFLICT (network, query_id) DO NOTHING
                    "#,
                )
                .bind(network.as_str())
                .bind(query_id)
                .bind(&record.transaction_hash)
                .bind(record.receipt_status.as_str())
                .bind(record.last_modified_at)
                .execute(self.pool.as_ref())
                .await?
            }
            Some(version) => {
                let version = i64::try_from(version)
                    .map_err(|_| StoreError::Serialization(format!("version {version} out of range")))?;
                sqlx::query(
                    r#"
                    UPDATE confirmations
                    SET transaction_hash = $3, receipt_status = $4, last_modified_at = $5,
                        version = version + 1
                    WHERE network = $1 AND query_id = $2 AND version = $6
                    "#,
                )
                .bind(network.as_str())
                .bind(query_id)
                .bind(&record.transaction_hash)
                .bind(record.receipt_status.as_str())
                .bind(record.last_modified_at)
                .bind(version)
                .execute(self.pool.as_ref())
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                key: format!("{network}/{query_id}"),
            });
        }

        let next = expected_version.map_or(1, |v| v + 1);
        debug!(%network, query_id, version = next, status = %record.receipt_status, "Confirmation stored");
        Ok(next)
    }

    async fn merge_stat(
        &self,
        network: Network,
        field: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut patch = serde_json::Map::new();
        patch.insert(field.to_string(), value);

        sqlx::query(
            r#"
            INSERT INTO stats (network, data, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (network) DO UPDATE
            SET data = stats.data || EXCLUDED.data, updated_at = NOW()
            "#,
        )
        .bind(network.as_str())
        .bind(Json(patch))
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn merge_lifecycle(
        &self,
        network: Network,
        game_id: &str,
        update: LifecycleUpdate,
    ) -> Result<(), StoreError> {
        let patch = update.to_json()?;

        sqlx::query(
            r#"
            INSERT INTO game_lifecycle (network, game_id, data, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (network, game_id) DO UPDATE
            SET data = game_lifecycle.data || EXCLUDED.data, updated_at = NOW()
            "#,
        )
        .bind(network.as_str())
        .bind(game_id)
        .bind(Json(patch))
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }
}
