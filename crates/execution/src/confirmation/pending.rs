use crate::error::ListenerError;
use chainwatch_domain::{Network, ReceiptStatus, ResolutionSource};
use chainwatch_protocols::B256;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How a confirmation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationOutcome {
    /// Status committed (or that would have been committed).
    pub status: ReceiptStatus,
    /// Which path settled the confirmation.
    pub source: ResolutionSource,
    /// Poll attempts made before resolution.
    pub attempts: u32,
    /// Whether the store was written; `false` when the stored record was
    /// already final.
    pub committed: bool,
}

type OutcomeSlot = Option<Result<ConfirmationOutcome, ListenerError>>;

/// One tracked `(network, tx_hash)` pair.
#[derive(Debug)]
pub struct PendingConfirmation {
    /// Correlation id for logs.
    pub id: Uuid,
    pub network: Network,
    pub query_id: String,
    /// Canonical lowercase hash.
    pub tx_hash: String,
    pub(crate) hash: B256,
    attempts: AtomicU32,
    resolved: AtomicBool,
    cancel: CancellationToken,
    outcome: watch::Sender<OutcomeSlot>,
}

impl PendingConfirmation {
    pub(crate) fn new(network: Network, query_id: &str, hash: B256) -> Self {
        Self {
            id: Uuid::new_v4(),
            network,
            query_id: query_id.to_string(),
            tx_hash: hash.to_string(),
            hash,
            attempts: AtomicU32::new(0),
            resolved: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            outcome: watch::Sender::new(None),
        }
    }

    /// Check-and-set on the resolved latch. Only the first caller wins.
    pub fn try_resolve(&self) -> bool {
        self.resolved
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::SeqCst)
    }

    pub(crate) fn record_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Stops both paths at their next await point.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub(crate) fn publish(&self, result: Result<ConfirmationOutcome, ListenerError>) {
        self.outcome.send_replace(Some(result));
    }

    pub fn handle(&self) -> ConfirmationHandle {
        ConfirmationHandle {
            query_id: self.query_id.clone(),
            tx_hash: self.tx_hash.clone(),
            rx: self.outcome.subscribe(),
        }
    }
}

/// Waitable view of a [`PendingConfirmation`]. Any number may exist.
#[derive(Debug, Clone)]
pub struct ConfirmationHandle {
    pub query_id: String,
    pub tx_hash: String,
    rx: watch::Receiver<OutcomeSlot>,
}

impl ConfirmationHandle {
    /// Waits for the confirmation to settle.
    ///
    /// # Errors
    /// Returns the commit error, or [`ListenerError::Shutdown`] when the
    /// confirmation was cancelled by a rebind or shutdown.
    pub async fn outcome(mut self) -> Result<ConfirmationOutcome, ListenerError> {
        loop {
            if let Some(result) = self.rx.borrow_and_update().clone() {
                return result;
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone().unwrap_or(Err(ListenerError::Shutdown));
            }
        }
    }

    /// The outcome, if already settled.
    pub fn try_outcome(&self) -> OutcomeSlot {
        self.rx.borrow().clone()
    }
}
