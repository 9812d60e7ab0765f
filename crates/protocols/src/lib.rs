//! Node endpoint access for the listener.
//!
//! The listener only needs two capabilities from a node: a streaming
//! subscription (contract logs, new heads) and point queries (block height,
//! transaction receipts). They are expressed by [`NodeProvider`]; the
//! [`rpc`] module implements them on top of alloy.

pub mod abi;
pub mod error;
pub mod rpc;
pub mod types;

pub use abi::EventDecoder;
pub use error::ProtocolError;
pub use rpc::{AlloyConnector, AlloyNodeProvider, RpcConfig};
pub use types::{LogStream, RawLog, ReceiptFuture, TxReceipt};

pub use alloy::primitives::{Address, B256, Bytes, keccak256};

use async_trait::async_trait;
use std::sync::Arc;

/// Read-only access to one node connection.
#[async_trait]
pub trait NodeProvider: Send + Sync {
    /// Chain id reported by the node.
    async fn chain_id(&self) -> Result<u64, ProtocolError>;

    /// Current block height. Used as the heartbeat query.
    async fn block_number(&self) -> Result<u64, ProtocolError>;

    /// Point query for a receipt; `None` while the transaction is unmined.
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, ProtocolError>;

    /// Streams logs emitted by `address` whose first topic is one of `topics`.
    ///
    /// The stream ends when the underlying connection goes away.
    async fn subscribe_logs(
        &self,
        address: Address,
        topics: Vec<B256>,
    ) -> Result<LogStream, ProtocolError>;

    /// One-shot push notification that resolves once `hash` is mined.
    async fn watch_receipt(&self, hash: B256) -> Result<ReceiptFuture, ProtocolError>;
}

/// Opens [`NodeProvider`]s.
#[async_trait]
pub trait NodeConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Arc<dyn NodeProvider>, ProtocolError>;
}
