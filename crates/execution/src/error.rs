//! Listener error taxonomy.

use chainwatch_data::StoreError;
use chainwatch_domain::DomainError;
use chainwatch_protocols::ProtocolError;
use thiserror::Error;

/// Errors surfaced by the listener components.
///
/// Cloneable so a single confirmation outcome can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    /// Transient transport failure; handled by the reconnect policy.
    #[error("connection error: {0}")]
    Connection(String),
    /// Missing or invalid configuration. The previous binding stays active.
    #[error("config error: {0}")]
    Config(String),
    /// An event handler failed.
    #[error("handler error: {0}")]
    Handler(String),
    /// The stored transaction hash differs from the observed one.
    #[error("confirmation mismatch for query {query_id}: stored {stored}, observed {observed}")]
    ConfirmationMismatch {
        query_id: String,
        stored: String,
        observed: String,
    },
    /// The transaction is already being confirmed for another query.
    #[error("transaction {tx_hash} is already tracked for query {tracked_query_id}, not {query_id}")]
    PendingConflict {
        tx_hash: String,
        tracked_query_id: String,
        query_id: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Reconnect attempts exhausted; the listener for this network stops.
    #[error("fatal: {0}")]
    Fatal(String),
    #[error("listener is shutting down")]
    Shutdown,
}

impl From<DomainError> for ListenerError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::HashMismatch {
                query_id,
                stored,
                observed,
            } => ListenerError::ConfirmationMismatch {
                query_id,
                stored,
                observed,
            },
            other => ListenerError::Config(other.to_string()),
        }
    }
}

impl From<ProtocolError> for ListenerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidAbi(_) | ProtocolError::InvalidEndpoint(_) => {
                ListenerError::Config(err.to_string())
            }
            other => ListenerError::Connection(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_mismatch_maps_to_confirmation_mismatch() {
        let err: ListenerError = DomainError::HashMismatch {
            query_id: "1".to_string(),
            stored: "0xa".to_string(),
            observed: "0xb".to_string(),
        }
        .into();
        assert!(matches!(err, ListenerError::ConfirmationMismatch { .. }));
    }

    #[test]
    fn test_protocol_errors_split_into_config_and_connection() {
        let abi: ListenerError = ProtocolError::InvalidAbi("bad".to_string()).into();
        let timeout: ListenerError =
            ProtocolError::Timeout(std::time::Duration::from_secs(1)).into();
        assert!(matches!(abi, ListenerError::Config(_)));
        assert!(matches!(timeout, ListenerError::Connection(_)));
    }
}
