use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("invalid contract address: {0}")]
    InvalidAddress(String),
    #[error("invalid interface descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("unknown network: {0}")]
    UnknownNetwork(String),
    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),
    #[error("transaction hash mismatch for query {query_id}: stored {stored}, observed {observed}")]
    HashMismatch {
        query_id: String,
        stored: String,
        observed: String,
    },
}
