use super::pending::{ConfirmationHandle, ConfirmationOutcome, PendingConfirmation};
use crate::error::ListenerError;
use crate::sync::{Connection, ConnectionManager};
use chainwatch_data::{StateStore, transact_confirmation};
use chainwatch_domain::{
    CommitPlan, ConfirmationRecord, Network, ReceiptStatus, ResolutionSource,
};
use chainwatch_protocols::{B256, NodeProvider};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Configuration for the transaction confirmer.
#[derive(Debug, Clone)]
pub struct ConfirmerConfig {
    /// Receipt queries before the confirmation is given up.
    pub poll_attempts: u32,
    /// Wait before each receipt query.
    pub poll_interval: Duration,
    /// Whether to also wait for a push notification on the live connection.
    pub push_enabled: bool,
}

impl Default for ConfirmerConfig {
    fn default() -> Self {
        Self {
            poll_attempts: 3,
            poll_interval: Duration::from_secs(1),
            push_enabled: true,
        }
    }
}

type PendingKey = (Network, String);

struct Inner {
    network: Network,
    config: ConfirmerConfig,
    store: Arc<dyn StateStore>,
    poller: Arc<dyn NodeProvider>,
    connections: ConnectionManager,
    pending: Mutex<HashMap<PendingKey, Arc<PendingConfirmation>>>,
}

/// Confirms transactions and records their outcome.
///
/// Each confirmation runs two paths: a push subscription on the live
/// connection and a bounded polling loop against `poller`. The poller is a
/// separate client, so a reconnect of the event connection never cuts a
/// poll short. Whichever path resolves first commits; the other is
/// cancelled and its late result discarded.
#[derive(Clone)]
pub struct TransactionConfirmer {
    inner: Arc<Inner>,
}

impl TransactionConfirmer {
    pub fn new(
        network: Network,
        config: ConfirmerConfig,
        store: Arc<dyn StateStore>,
        poller: Arc<dyn NodeProvider>,
        connections: ConnectionManager,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                network,
                config,
                store,
                poller,
                connections,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn network(&self) -> Network {
        self.inner.network
    }

    /// Starts confirming `tx_hash` for `query_id`.
    ///
    /// A `pending` record is written first. Asking again for a hash that is
    /// already tracked for the same query returns a handle to the running
    /// confirmation.
    ///
    /// # Errors
    /// - [`ListenerError::Config`] for a foreign network.
    /// - [`ListenerError::Handler`] for a malformed hash.
    /// - [`ListenerError::PendingConflict`] if the hash is tracked for
    ///   another query.
    /// - [`ListenerError::ConfirmationMismatch`] if the stored record for
    ///   `query_id` carries a different hash.
    /// - [`ListenerError::Store`] if the pending record cannot be written.
    pub async fn confirm(
        &self,
        network: Network,
        query_id: &str,
        tx_hash: &str,
    ) -> Result<ConfirmationHandle, ListenerError> {
        if network != self.inner.network {
            return Err(ListenerError::Config(format!(
                "confirmer for {} cannot confirm on {network}",
                self.inner.network
            )));
        }
        let hash: B256 = tx_hash
            .trim()
            .parse()
            .map_err(|e| ListenerError::Handler(format!("invalid transaction hash {tx_hash}: {e}")))?;

        let pending = {
            let mut registry = self.inner.pending.lock().await;
            let key = (network, hash.to_string());
            if let Some(existing) = registry.get(&key) {
                if existing.query_id != query_id {
                    return Err(ListenerError::PendingConflict {
                        tx_hash: existing.tx_hash.clone(),
                        tracked_query_id: existing.query_id.clone(),
                        query_id: query_id.to_string(),
                    });
                }
                debug!(%network, query_id, id = %existing.id, "Attaching to running confirmation");
                return Ok(existing.handle());
            }
            let pending = Arc::new(PendingConfirmation::new(network, query_id, hash));
            registry.insert(key, pending.clone());
            pending
        };

        if let Err(e) = self.commit(&pending, ReceiptStatus::Pending).await {
            warn!(
                %network,
                query_id,
                tx_hash = %pending.tx_hash,
                error = %e,
                "Rejected confirmation request"
            );
            pending.try_resolve();
            pending.cancel();
            self.forget(&pending).await;
            pending.publish(Err(e.clone()));
            return Err(e);
        }

        info!(
            %network,
            query_id,
            tx_hash = %pending.tx_hash,
            id = %pending.id,
            "Confirming transaction"
        );
        let handle = pending.handle();
        self.start(pending);
        Ok(handle)
    }

    /// Cancels every outstanding confirmation without writing anything.
    /// Waiters see [`ListenerError::Shutdown`]. Returns how many were
    /// cancelled.
    pub async fn cancel_all(&self) -> usize {
        let drained: Vec<Arc<PendingConfirmation>> = self
            .inner
            .pending
            .lock()
            .await
            .drain()
            .map(|(_, pending)| pending)
            .collect();

        let mut cancelled = 0;
        for pending in drained {
            if pending.try_resolve() {
                pending.cancel();
                pending.publish(Err(ListenerError::Shutdown));
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(network = %self.inner.network, count = cancelled, "Cancelled outstanding confirmations");
        }
        cancelled
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    fn start(&self, pending: Arc<PendingConfirmation>) {
        if self.inner.config.push_enabled {
            match self.inner.connections.current() {
                Some(connection) => {
                    tokio::spawn(self.clone().push_path(connection, pending.clone()));
                }
                None => debug!(
                    network = %pending.network,
                    id = %pending.id,
                    "No live connection, confirming by polling only"
                ),
            }
        }
        tokio::spawn(self.clone().poll_path(pending));
    }

    async fn push_path(self, connection: Connection, pending: Arc<PendingConfirmation>) {
        let network = pending.network;
        let watch = tokio::select! {
            _ = pending.cancelled() => return,
            watch = connection.provider().watch_receipt(pending.hash) => watch,
        };
        let notified = match watch {
            Ok(notified) => notified,
            Err(e) => {
                debug!(%network, id = %pending.id, error = %e, "Push subscription unavailable");
                return;
            }
        };

        let detached = connection.child_token();
        tokio::select! {
            _ = pending.cancelled() => {}
            _ = detached.cancelled() => {
                debug!(%network, id = %pending.id, "Push subscription closed with its connection");
            }
            receipt = notified => match receipt {
                Ok(receipt) => {
                    self.settle(
                        &pending,
                        ReceiptStatus::from_receipt(receipt.success),
                        ResolutionSource::Push,
                    )
                    .await;
                }
                Err(e) => debug!(%network, id = %pending.id, error = %e, "Push subscription failed"),
            },
        }
    }

    async fn poll_path(self, pending: Arc<PendingConfirmation>) {
        let network = pending.network;
        let interval = self.inner.config.poll_interval;

        for _ in 0..self.inner.config.poll_attempts {
            tokio::select! {
                _ = pending.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            let attempt = pending.record_attempt();
            let queried = tokio::select! {
                _ = pending.cancelled() => return,
                queried = self.inner.poller.transaction_receipt(pending.hash) => queried,
            };
            match queried {
                Ok(Some(receipt)) => {
                    self.settle(
                        &pending,
                        ReceiptStatus::from_receipt(receipt.success),
                        ResolutionSource::Poll,
                    )
                    .await;
                    return;
                }
                Ok(None) => debug!(%network, id = %pending.id, attempt, "Receipt not available yet"),
                Err(e) => warn!(%network, id = %pending.id, attempt, error = %e, "Receipt query failed"),
            }
        }

        if !pending.is_resolved() {
            warn!(
                %network,
                query_id = %pending.query_id,
                tx_hash = %pending.tx_hash,
                attempts = pending.attempts(),
                "Could not confirm transaction, recording failure"
            );
        }
        self.settle(&pending, ReceiptStatus::Failure, ResolutionSource::Unresolved)
            .await;
    }

    async fn settle(
        &self,
        pending: &Arc<PendingConfirmation>,
        status: ReceiptStatus,
        source: ResolutionSource,
    ) {
        if !pending.try_resolve() {
            debug!(network = %pending.network, id = %pending.id, ?source, "Confirmation already resolved, discarding");
            return;
        }
        pending.cancel();

        let result = self
            .commit(pending, status)
            .await
            .map(|committed| ConfirmationOutcome {
                status,
                source,
                attempts: pending.attempts(),
                committed,
            });
        match &result {
            Ok(outcome) => info!(
                network = %pending.network,
                query_id = %pending.query_id,
                tx_hash = %pending.tx_hash,
                status = %outcome.status,
                source = ?outcome.source,
                attempts = outcome.attempts,
                committed = outcome.committed,
                "Confirmation resolved"
            ),
            Err(e) => error!(
                network = %pending.network,
                query_id = %pending.query_id,
                tx_hash = %pending.tx_hash,
                error = %e,
                "Failed to record confirmation"
            ),
        }

        self.forget(pending).await;
        pending.publish(result);
    }

    /// Returns whether the store was written.
    async fn commit(
        &self,
        pending: &PendingConfirmation,
        status: ReceiptStatus,
    ) -> Result<bool, ListenerError> {
        let written = transact_confirmation::<_, _, ListenerError>(
            self.inner.store.as_ref(),
            pending.network,
            &pending.query_id,
            |existing| {
                match ConfirmationRecord::plan_commit(
                    existing,
                    &pending.query_id,
                    &pending.tx_hash,
                    status,
                )? {
                    CommitPlan::Create(record) | CommitPlan::Merge(record) => Ok(Some(record)),
                    CommitPlan::Skip => Ok(None),
                }
            },
        )
        .await?;
        Ok(written.is_some())
    }

    async fn forget(&self, pending: &Arc<PendingConfirmation>) {
        let mut registry = self.inner.pending.lock().await;
        let key = (pending.network, pending.tx_hash.clone());
        if registry.get(&key).is_some_and(|p| Arc::ptr_eq(p, pending)) {
            registry.remove(&key);
        }
    }
}
