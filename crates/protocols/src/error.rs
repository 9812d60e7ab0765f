use thiserror::Error;

/// Errors raised while talking to a node or decoding what it returned.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// Socket, HTTP or JSON-RPC failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// The node did not answer within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// The endpoint URL is malformed or has an unsupported scheme.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// A subscription stream ended before producing a result.
    #[error("subscription closed")]
    SubscriptionClosed,
    /// The interface descriptor is not a usable JSON ABI.
    #[error("invalid ABI: {0}")]
    InvalidAbi(String),
    /// A log could not be decoded against the active ABI.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ProtocolError {
    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}
