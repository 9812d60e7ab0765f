//! In-process store and feed.

use crate::error::StoreError;
use crate::feed::{ConfigDocument, ConfigFeed, ConfigStream};
use crate::lifecycle::LifecycleUpdate;
use crate::store::{StateStore, Versioned};
use async_trait::async_trait;
use chainwatch_domain::{ConfirmationRecord, Network};
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::warn;

type Key = (Network, String);

/// Accepted confirmation writes kept for inspection.
const HISTORY_LIMIT: usize = 1024;

#[derive(Default)]
struct StoreInner {
    confirmations: HashMap<Key, Versioned<ConfirmationRecord>>,
    /// Most recent accepted confirmation writes, oldest first.
    history: VecDeque<(Key, ConfirmationRecord)>,
    write_count: usize,
    stats: HashMap<Network, serde_json::Map<String, serde_json::Value>>,
    lifecycle: HashMap<Key, serde_json::Map<String, serde_json::Value>>,
    forced_conflicts: u32,
}

/// [`StateStore`] backed by process memory.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` conditional writes fail with a conflict.
    pub async fn inject_conflicts(&self, count: u32) {
        self.inner.write().await.forced_conflicts = count;
    }

    pub async fn confirmation(&self, network: Network, query_id: &str) -> Option<ConfirmationRecord> {
        self.inner
            .read()
            .await
            .confirmations
            .get(&(network, query_id.to_string()))
            .map(|v| v.value.clone())
    }

    /// Recent accepted writes for `(network, query_id)`, oldest first. Only
    /// the last 1024 writes across all keys are kept.
    pub async fn writes(&self, network: Network, query_id: &str) -> Vec<ConfirmationRecord> {
        self.inner
            .read()
            .await
            .history
            .iter()
            .filter(|((n, q), _)| *n == network && q == query_id)
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Accepted confirmation writes since creation.
    pub async fn write_count(&self) -> usize {
        self.inner.read().await.write_count
    }

    pub async fn stats(&self, network: Network) -> serde_json::Map<String, serde_json::Value> {
        self.inner
            .read()
            .await
            .stats
            .get(&network)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn lifecycle(
        &self,
        network: Network,
        game_id: &str,
    ) -> serde_json::Map<String, serde_json::Value> {
        self.inner
            .read()
            .await
            .lifecycle
            .get(&(network, game_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load_confirmation(
        &self,
        network: Network,
        query_id: &str,
    ) -> Result<Option<Versioned<ConfirmationRecord>>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .confirmations
            .get(&(network, query_id.to_string()))
            .cloned())
    }

    async fn store_confirmation(
        &self,
        network: Network,
        query_id: &str,
        expected_version: Option<u64>,
        record: ConfirmationRecord,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let key = (network, query_id.to_string());

        if inner.forced_conflicts > 0 {
            inner.forced_conflicts -= 1;
            return Err(StoreError::Conflict {
                key: format!("{network}/{query_id}"),
            });
        }

        let current = inner.confirmations.get(&key).map(|v| v.version);
        if current != expected_version {
            return Err(StoreError::Conflict {
                key: format!("{network}/{query_id}"),
            });
        }

        let version = current.unwrap_or(0) + 1;
        if inner.history.len() == HISTORY_LIMIT {
            inner.history.pop_front();
        }
        inner.history.push_back((key.clone(), record.clone()));
        inner.write_count += 1;
        inner.confirmations.insert(
            key,
            Versioned {
                value: record,
                version,
            },
        );
        Ok(version)
    }

    async fn merge_stat(
        &self,
        network: Network,
        field: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .stats
            .entry(network)
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn merge_lifecycle(
        &self,
        network: Network,
        game_id: &str,
        update: LifecycleUpdate,
    ) -> Result<(), StoreError> {
        let fields = update.to_json()?;
        self.inner
            .write()
            .await
            .lifecycle
            .entry((network, game_id.to_string()))
            .or_default()
            .extend(fields);
        Ok(())
    }
}

const FEED_CAPACITY: usize = 64;

#[derive(Default)]
struct FeedInner {
    current: HashMap<Network, ConfigDocument>,
    channels: HashMap<Network, broadcast::Sender<ConfigDocument>>,
}

/// [`ConfigFeed`] fed by explicit [`MemoryConfigFeed::publish`] calls.
#[derive(Clone, Default)]
pub struct MemoryConfigFeed {
    inner: Arc<RwLock<FeedInner>>,
}

impl MemoryConfigFeed {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the document for `network` and notifies subscribers.
    pub async fn publish(&self, network: Network, document: ConfigDocument) {
        let mut inner = self.inner.write().await;
        inner.current.insert(network, document.clone());
        if let Some(tx) = inner.channels.get(&network) {
            // No receivers is fine; the current document is still recorded.
            let _ = tx.send(document);
        }
    }

    /// Ends every subscription for `network`, like a dropped feed
    /// connection. Later subscriptions work as before.
    pub async fn close(&self, network: Network) {
        self.inner.write().await.channels.remove(&network);
    }
}

#[async_trait]
impl ConfigFeed for MemoryConfigFeed {
    async fn current(&self, network: Network) -> Result<Option<ConfigDocument>, StoreError> {
        Ok(self.inner.read().await.current.get(&network).cloned())
    }

    async fn subscribe(&self, network: Network) -> Result<ConfigStream, StoreError> {
        let rx = self
            .inner
            .write()
            .await
            .channels
            .entry(network)
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .subscribe();

        let stream = futures::stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(document) => return Some((document, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%network, skipped, "Config subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}
