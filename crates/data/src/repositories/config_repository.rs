//! Contract configuration read through `LISTEN/NOTIFY`.

use crate::error::StoreError;
use crate::feed::{ConfigDocument, ConfigFeed, ConfigStream};
use async_trait::async_trait;
use chainwatch_domain::Network;
use futures::StreamExt;
use sqlx::postgres::{PgListener, PgRow};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{info, warn};

/// Notification channel raised by the `contract_config` trigger.
pub const CONFIG_CHANNEL: &str = "contract_config_changed";

fn document_from_row(row: &PgRow) -> Result<ConfigDocument, sqlx::Error> {
    Ok(ConfigDocument {
        address: row.try_get("address")?,
        interface_descriptor: row.try_get("abi")?,
    })
}

async fn fetch(pool: &PgPool, network: Network) -> Result<Option<ConfigDocument>, sqlx::Error> {
    let row = sqlx::query("SELECT address, abi FROM contract_config WHERE network = $1")
        .bind(network.as_str())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(document_from_row).transpose()
}

/// [`ConfigFeed`] over the `contract_config` table.
#[derive(Clone)]
pub struct PgConfigFeed {
    pool: Arc<PgPool>,
}

impl PgConfigFeed {
    /// Creates a new PgConfigFeed.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigFeed for PgConfigFeed {
    async fn current(&self, network: Network) -> Result<Option<ConfigDocument>, StoreError> {
        Ok(fetch(&self.pool, network).await?)
    }

    async fn subscribe(&self, network: Network) -> Result<ConfigStream, StoreError> {
        let mut listener = PgListener::connect_with(self.pool.as_ref()).await?;
        listener.listen(CONFIG_CHANNEL).await?;
        info!(%network, channel = CONFIG_CHANNEL, "Listening for config changes");

        let pool = self.pool.clone();
        let stream = futures::stream::unfold(listener, move |mut listener| {
            let pool = pool.clone();
            async move {
                loop {
                    let notification = match listener.recv().await {
                        Ok(notification) => notification,
                        Err(err) => {
                            warn!(%network, error = %err, "Config listener closed");
                            return None;
                        }
                    };
                    if notification.payload() != network.as_str() {
                        continue;
                    }
                    match fetch(&pool, network).await {
                        Ok(Some(document)) => return Some((document, listener)),
                        Ok(None) => warn!(%network, "Config row vanished after notification"),
                        Err(err) => warn!(%network, error = %err, "Failed to read config row"),
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}
