use super::EventHandler;
use crate::confirmation::TransactionConfirmer;
use crate::error::ListenerError;
use async_trait::async_trait;
use chainwatch_data::StateStore;
use chainwatch_domain::{ContractBinding, EventKind, EventRecord, Network, format_units};
use primitive_types::U256;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

const ETHER_DECIMALS: u32 = 18;

fn uint_arg(record: &EventRecord, index: usize, name: &str) -> Result<U256, ListenerError> {
    record.arg(index).and_then(|v| v.as_uint()).ok_or_else(|| {
        ListenerError::Handler(format!(
            "{} is missing uint argument {name}",
            record.event_name
        ))
    })
}

/// Wei amount as a decimal ether string.
pub(crate) fn ether_string(wei: U256) -> Result<String, ListenerError> {
    format_units(wei, ETHER_DECIMALS)
        .map(|ether| ether.to_string())
        .ok_or_else(|| ListenerError::Handler(format!("amount {wei} is out of range")))
}

/// Starts confirming the transaction that paid a query fee.
pub struct QueryFeePaidHandler {
    confirmer: TransactionConfirmer,
}

impl QueryFeePaidHandler {
    pub fn new(confirmer: TransactionConfirmer) -> Self {
        Self { confirmer }
    }
}

#[async_trait]
impl EventHandler for QueryFeePaidHandler {
    async fn handle(
        &self,
        network: Network,
        _binding: &ContractBinding,
        record: &EventRecord,
    ) -> Result<(), ListenerError> {
        let query_id = uint_arg(record, 2, "queryID")?.to_string();
        let tx_hash = record.tx_hash.as_deref().ok_or_else(|| {
            ListenerError::Handler(format!("QueryFeePaid for query {query_id} has no transaction hash"))
        })?;

        info!(%network, query_id = %query_id, tx_hash, "Query fee paid");
        // The outcome is recorded by the confirmer; nobody waits on it here.
        self.confirmer.confirm(network, &query_id, tx_hash).await?;
        Ok(())
    }
}

/// Maps a counter event to its stats field and value.
///
/// # Errors
/// Returns [`ListenerError::Handler`] for other events or missing arguments.
pub fn stat_update(record: &EventRecord) -> Result<(&'static str, Value), ListenerError> {
    match record.event_name {
        EventKind::NextQueryFee => Ok((
            "interactionCost",
            Value::String(ether_string(uint_arg(record, 0, "nextFee")?)?),
        )),
        EventKind::CurrentPrizePool => Ok((
            "currentPrizePool",
            Value::String(ether_string(uint_arg(record, 0, "prizePool")?)?),
        )),
        EventKind::TotalQueries => {
            let queries = uint_arg(record, 0, "queries")?;
            let value = if queries.bits() <= 64 {
                Value::from(queries.low_u64())
            } else {
                Value::String(queries.to_string())
            };
            Ok(("breakInAttempts", value))
        }
        other => Err(ListenerError::Handler(format!("{other} is not a stats event"))),
    }
}

/// Merges counter events into the per-network stats document.
pub struct StatsHandler {
    store: Arc<dyn StateStore>,
}

impl StatsHandler {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for StatsHandler {
    async fn handle(
        &self,
        network: Network,
        _binding: &ContractBinding,
        record: &EventRecord,
    ) -> Result<(), ListenerError> {
        let (field, value) = stat_update(record)?;
        debug!(%network, field, %value, "Updating stat");
        self.store.merge_stat(network, field, value).await?;
        Ok(())
    }
}
