//! The state store contract and its optimistic read-modify-write helper.

use crate::error::StoreError;
use crate::lifecycle::LifecycleUpdate;
use async_trait::async_trait;
use chainwatch_domain::{ConfirmationRecord, Network};
use tracing::debug;

/// Number of conflicting attempts [`transact_confirmation`] tolerates.
pub const MAX_TRANSACT_ATTEMPTS: u32 = 5;

/// A stored value together with the version used for compare-and-swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// Stored value.
    pub value: T,
    /// Monotonic write counter, starting at 1.
    pub version: u64,
}

/// Document store consumed by the listener.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads the confirmation record for `(network, query_id)`.
    async fn load_confirmation(
        &self,
        network: Network,
        query_id: &str,
    ) -> Result<Option<Versioned<ConfirmationRecord>>, StoreError>;

    /// Writes `record` if the stored version still equals `expected_version`
    /// (`None` meaning "no record yet"). Returns the new version.
    ///
    /// # Errors
    /// Returns [`StoreError::Conflict`] when the version check fails.
    async fn store_confirmation(
        &self,
        network: Network,
        query_id: &str,
        expected_version: Option<u64>,
        record: ConfirmationRecord,
    ) -> Result<u64, StoreError>;

    /// Merges one field into the per-network stats document.
    async fn merge_stat(
        &self,
        network: Network,
        field: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Merges the set fields of `update` into the game lifecycle document.
    async fn merge_lifecycle(
        &self,
        network: Network,
        game_id: &str,
        update: LifecycleUpdate,
    ) -> Result<(), StoreError>;
}

/// Optimistic read-modify-write over one confirmation record.
///
/// `decide` sees the current record and returns the record to write, or
/// `None` to leave the store untouched. Version conflicts re-run the whole
/// cycle, up to [`MAX_TRANSACT_ATTEMPTS`] times. Returns what was written.
///
/// # Errors
/// Propagates errors from `decide` unchanged and store failures converted
/// into `E`; running out of attempts yields [`StoreError::Contention`].
pub async fn transact_confirmation<S, F, E>(
    store: &S,
    network: Network,
    query_id: &str,
    mut decide: F,
) -> Result<Option<ConfirmationRecord>, E>
where
    S: StateStore + ?Sized,
    F: FnMut(Option<&ConfirmationRecord>) -> Result<Option<ConfirmationRecord>, E>,
    E: From<StoreError>,
{
    for attempt in 1..=MAX_TRANSACT_ATTEMPTS {
        let current = store.load_confirmation(network, query_id).await?;
        let Some(next) = decide(current.as_ref().map(|v| &v.value))? else {
            return Ok(None);
        };

        let expected = current.map(|v| v.version);
        match store
            .store_confirmation(network, query_id, expected, next.clone())
            .await
        {
            Ok(_) => return Ok(Some(next)),
            Err(StoreError::Conflict { .. }) => {
                debug!(%network, query_id, attempt, "Confirmation write conflicted, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(StoreError::Contention {
        key: format!("{network}/{query_id}"),
        attempts: MAX_TRANSACT_ATTEMPTS,
    }
    .into())
}
