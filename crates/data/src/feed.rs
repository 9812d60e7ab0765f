//! Read-only contract configuration feed.

use crate::error::StoreError;
use async_trait::async_trait;
use chainwatch_domain::Network;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Raw configuration document as published for a network.
///
/// Values are passed through unvalidated; the consumer decides whether they
/// form a usable binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    /// Contract address.
    pub address: String,
    /// JSON ABI, either a bare array or `{ "abi": [...] }`.
    pub interface_descriptor: serde_json::Value,
}

/// Change notifications for one network, in publication order.
pub type ConfigStream = BoxStream<'static, ConfigDocument>;

#[async_trait]
pub trait ConfigFeed: Send + Sync {
    /// The document currently published for `network`, if any.
    async fn current(&self, network: Network) -> Result<Option<ConfigDocument>, StoreError>;

    /// Subscribes to future changes for `network`.
    async fn subscribe(&self, network: Network) -> Result<ConfigStream, StoreError>;
}
