//! Transport-neutral shapes of what a node hands back.

use crate::error::ProtocolError;
use alloy::primitives::{Address, B256, Bytes};
use futures::future::BoxFuture;
use futures::stream::BoxStream;

/// An undecoded contract log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    /// Emitting contract.
    pub address: Address,
    /// Topic 0 is the event selector for non-anonymous events.
    pub topics: Vec<B256>,
    /// ABI-encoded non-indexed arguments.
    pub data: Bytes,
    /// Block the log was included in, when known.
    pub block_number: Option<u64>,
    /// Transaction that emitted the log, when known.
    pub transaction_hash: Option<B256>,
}

/// The part of a receipt the confirmer cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    /// Transaction hash.
    pub transaction_hash: B256,
    /// Execution status flag.
    pub success: bool,
    /// Inclusion block.
    pub block_number: Option<u64>,
}

/// Live log subscription.
pub type LogStream = BoxStream<'static, RawLog>;

/// Pending push notification for one transaction.
pub type ReceiptFuture = BoxFuture<'static, Result<TxReceipt, ProtocolError>>;
