//! alloy-backed node access over WebSocket or HTTP.

use crate::error::ProtocolError;
use crate::types::{LogStream, RawLog, ReceiptFuture, TxReceipt};
use crate::{NodeConnector, NodeProvider};
use alloy::network::ReceiptResponse;
use alloy::primitives::{Address, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log, TransactionReceipt};
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for node connections.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Timeout applied to every point query and subscription request.
    pub request_timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens alloy providers. `ws://`/`wss://` URLs get a pub-sub capable
/// WebSocket transport, anything else is treated as HTTP.
#[derive(Debug, Clone, Default)]
pub struct AlloyConnector {
    config: RpcConfig,
}

impl AlloyConnector {
    /// Creates a connector.
    #[must_use]
    pub fn new(config: RpcConfig) -> Self {
        Self { config }
    }

    /// HTTP provider for point queries, built without contacting the node.
    /// Endpoint problems surface on the first query.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidEndpoint`] unless `url` is an
    /// `http(s)://` URL.
    pub fn http(&self, url: &str) -> Result<Arc<dyn NodeProvider>, ProtocolError> {
        Ok(Arc::new(AlloyNodeProvider {
            inner: http_provider(url)?,
            request_timeout: self.config.request_timeout,
        }))
    }
}

fn http_provider(url: &str) -> Result<DynProvider, ProtocolError> {
    let url = url.trim();
    let parsed: Url = url
        .parse()
        .map_err(|e| ProtocolError::InvalidEndpoint(format!("{url}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ProtocolError::InvalidEndpoint(format!(
            "{url}: expected an http(s) URL"
        )));
    }
    Ok(ProviderBuilder::new().connect_http(parsed).erased())
}

#[async_trait]
impl NodeConnector for AlloyConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn NodeProvider>, ProtocolError> {
        let url = url.trim();
        let provider = if url.starts_with("ws://") || url.starts_with("wss://") {
            let connect = ProviderBuilder::new().connect_ws(WsConnect::new(url));
            with_timeout(self.config.request_timeout, connect)
                .await?
                .map_err(ProtocolError::transport)?
                .erased()
        } else {
            http_provider(url)?
        };

        let node = AlloyNodeProvider {
            inner: provider,
            request_timeout: self.config.request_timeout,
        };

        // Fail fast on endpoints that accept the socket but do not answer.
        let chain_id = node.chain_id().await?;
        info!(chain_id, "Node connection established");

        Ok(Arc::new(node))
    }
}

/// [`NodeProvider`] over a type-erased alloy provider.
#[derive(Clone)]
pub struct AlloyNodeProvider {
    inner: DynProvider,
    request_timeout: Duration,
}

async fn with_timeout<F, T>(limit: Duration, fut: F) -> Result<T, ProtocolError>
where
    F: IntoFuture<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ProtocolError::Timeout(limit))
}

fn receipt_from(receipt: &TransactionReceipt) -> TxReceipt {
    TxReceipt {
        transaction_hash: ReceiptResponse::transaction_hash(receipt),
        success: ReceiptResponse::status(receipt),
        block_number: ReceiptResponse::block_number(receipt),
    }
}

fn raw_log_from(log: Log) -> RawLog {
    RawLog {
        address: log.address(),
        topics: log.topics().to_vec(),
        data: log.data().data.clone(),
        block_number: log.block_number,
        transaction_hash: log.transaction_hash,
    }
}

#[async_trait]
impl NodeProvider for AlloyNodeProvider {
    async fn chain_id(&self) -> Result<u64, ProtocolError> {
        with_timeout(self.request_timeout, self.inner.get_chain_id())
            .await?
            .map_err(ProtocolError::transport)
    }

    async fn block_number(&self) -> Result<u64, ProtocolError> {
        with_timeout(self.request_timeout, self.inner.get_block_number())
            .await?
            .map_err(ProtocolError::transport)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, ProtocolError> {
        let receipt = with_timeout(
            self.request_timeout,
            self.inner.get_transaction_receipt(hash),
        )
        .await?
        .map_err(ProtocolError::transport)?;

        Ok(receipt.as_ref().map(receipt_from))
    }

    async fn subscribe_logs(
        &self,
        address: Address,
        topics: Vec<B256>,
    ) -> Result<LogStream, ProtocolError> {
        let filter = Filter::new().address(address).event_signature(topics);
        let subscription = with_timeout(self.request_timeout, self.inner.subscribe_logs(&filter))
            .await?
            .map_err(ProtocolError::transport)?;

        debug!(address = %address, "Log subscription opened");
        Ok(subscription.into_stream().map(raw_log_from).boxed())
    }

    async fn watch_receipt(&self, hash: B256) -> Result<ReceiptFuture, ProtocolError> {
        let mut heads = with_timeout(self.request_timeout, self.inner.subscribe_blocks())
            .await?
            .map_err(ProtocolError::transport)?
            .into_stream();
        let node = self.clone();

        Ok(async move {
            while let Some(head) = heads.next().await {
                if let Some(receipt) = node.transaction_receipt(hash).await? {
                    debug!(tx_hash = %hash, block = head.number, "Receipt observed on new head");
                    return Ok(receipt);
                }
            }
            Err(ProtocolError::SubscriptionClosed)
        }
        .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_provider_needs_no_node() {
        let connector = AlloyConnector::default();

        assert!(connector.http("http://127.0.0.1:8545").is_ok());
        assert!(connector.http(" https://rpc.example.org/v1 ").is_ok());
    }

    #[test]
    fn test_http_rejects_other_endpoints() {
        let connector = AlloyConnector::default();

        assert!(matches!(
            connector.http("wss://rpc.example.org"),
            Err(ProtocolError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            connector.http("not a url"),
            Err(ProtocolError::InvalidEndpoint(_))
        ));
    }
}
