use super::EventHandler;
use super::player_actions::ether_string;
use crate::error::ListenerError;
use async_trait::async_trait;
use chainwatch_data::{EndReason, GameStatus, LifecycleUpdate, StateStore};
use chainwatch_domain::{ContractBinding, EventKind, EventRecord, Network};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tracing::info;

fn timestamp_arg(record: &EventRecord, index: usize) -> DateTime<Utc> {
    record
        .arg(index)
        .and_then(|v| v.as_uint())
        .filter(|secs| secs.bits() <= 63)
        .and_then(|secs| Utc.timestamp_opt(secs.low_u64() as i64, 0).single())
        .unwrap_or(record.observed_at)
}

fn address_arg(record: &EventRecord, index: usize, name: &str) -> Result<String, ListenerError> {
    record
        .arg(index)
        .and_then(|v| v.as_address())
        .map(str::to_string)
        .ok_or_else(|| {
            ListenerError::Handler(format!(
                "{} is missing address argument {name}",
                record.event_name
            ))
        })
}

fn amount_arg(record: &EventRecord, index: usize, name: &str) -> Result<String, ListenerError> {
    let wei = record.arg(index).and_then(|v| v.as_uint()).ok_or_else(|| {
        ListenerError::Handler(format!(
            "{} is missing uint argument {name}",
            record.event_name
        ))
    })?;
    ether_string(wei)
}

/// Translates a game event into a partial lifecycle document.
///
/// Timestamps missing from the event fall back to when it was observed.
///
/// # Errors
/// Returns [`ListenerError::Handler`] for non-lifecycle events and missing
/// arguments.
pub fn lifecycle_update(record: &EventRecord) -> Result<LifecycleUpdate, ListenerError> {
    let update = match record.event_name {
        EventKind::GameStarted => {
            let at = timestamp_arg(record, 0);
            LifecycleUpdate {
                status: Some(GameStatus::Started),
                started_at: Some(at),
                idle_since: Some(at),
                ..Default::default()
            }
        }
        EventKind::GameEnded => LifecycleUpdate {
            status: Some(GameStatus::Ended),
            ended_at: Some(timestamp_arg(record, 0)),
            ..Default::default()
        },
        EventKind::PrizeTransferApproved => LifecycleUpdate {
            status: Some(GameStatus::Ended),
            end_reason: Some(EndReason::Won),
            winner: Some(address_arg(record, 0, "recipient")?),
            prize: Some(amount_arg(record, 1, "amount")?),
            ..Default::default()
        },
        EventKind::LastPlayerRewardAfterGameExhaustion => LifecycleUpdate {
            status: Some(GameStatus::Ended),
            end_reason: Some(EndReason::Exhausted),
            last_player: Some(address_arg(record, 0, "lastPlayer")?),
            last_player_reward: Some(amount_arg(record, 1, "reward")?),
            ..Default::default()
        },
        EventKind::RestOfThePlayersRewardAfterGameExhaustion => LifecycleUpdate {
            status: Some(GameStatus::Ended),
            end_reason: Some(EndReason::Exhausted),
            total_reward_distributed: Some(amount_arg(record, 0, "remainingPool")?),
            ..Default::default()
        },
        EventKind::GameResetByOwner => LifecycleUpdate {
            status: Some(GameStatus::Started),
            started_at: Some(timestamp_arg(record, 0)),
            ..Default::default()
        },
        other => {
            return Err(ListenerError::Handler(format!(
                "{other} is not a lifecycle event"
            )));
        }
    };
    Ok(update)
}

/// Merges game events into the lifecycle document of the bound contract.
pub struct GameLifecycleHandler {
    store: Arc<dyn StateStore>,
}

impl GameLifecycleHandler {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for GameLifecycleHandler {
    async fn handle(
        &self,
        network: Network,
        binding: &ContractBinding,
        record: &EventRecord,
    ) -> Result<(), ListenerError> {
        let update = lifecycle_update(record)?;
        info!(
            %network,
            game_id = %binding.address(),
            event = %record.event_name,
            status = ?update.status,
            "Game lifecycle changed"
        );
        self.store
            .merge_lifecycle(network, binding.address(), update)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ADDRESS_A, ADDRESS_B, binding};
    use chainwatch_data::MemoryStateStore;
    use chainwatch_domain::EventValue;
    use primitive_types::U256;
    use serde_json::json;

    fn record(kind: EventKind, args: Vec<EventValue>) -> EventRecord {
        EventRecord {
            event_name: kind,
            args,
            block_number: Some(100),
            tx_hash: None,
            observed_at: Utc.timestamp_opt(1_800_000_000, 0).unwrap(),
        }
    }

    fn uint(value: u128) -> EventValue {
        EventValue::Uint(U256::from(value))
    }

    #[test]
    fn test_game_started_sets_start_and_idle_time() {
        let update = lifecycle_update(&record(EventKind::GameStarted, vec![uint(1_700_000_000)])).unwrap();
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        assert_eq!(update.status, Some(GameStatus::Started));
        assert_eq!(update.started_at, Some(at));
        assert_eq!(update.idle_since, Some(at));
        assert_eq!(update.ended_at, None);
    }

    #[test]
    fn test_prize_transfer_records_winner() {
        let update = lifecycle_update(&record(
            EventKind::PrizeTransferApproved,
            vec![
                EventValue::Address(ADDRESS_B.to_lowercase()),
                uint(3_000_000_000_000_000_000),
            ],
        ))
        .unwrap();

        assert_eq!(update.end_reason, Some(EndReason::Won));
        assert_eq!(update.winner.as_deref(), Some(ADDRESS_B.to_lowercase().as_str()));
        assert_eq!(update.prize.as_deref(), Some("3"));
    }

    #[test]
    fn test_exhaustion_events_mark_game_exhausted() {
        let last = lifecycle_update(&record(
            EventKind::LastPlayerRewardAfterGameExhaustion,
            vec![EventValue::Address(ADDRESS_B.to_lowercase()), uint(500_000_000_000_000_000)],
        ))
        .unwrap();
        let rest = lifecycle_update(&record(
            EventKind::RestOfThePlayersRewardAfterGameExhaustion,
            vec![uint(4_500_000_000_000_000_000)],
        ))
        .unwrap();

        assert_eq!(last.end_reason, Some(EndReason::Exhausted));
        assert_eq!(last.last_player_reward.as_deref(), Some("0.5"));
        assert_eq!(rest.end_reason, Some(EndReason::Exhausted));
        assert_eq!(rest.total_reward_distributed.as_deref(), Some("4.5"));
    }

    #[test]
    fn test_missing_timestamp_falls_back_to_observed_time() {
        let record = record(EventKind::GameResetByOwner, vec![]);
        let update = lifecycle_update(&record).unwrap();

        assert_eq!(update.started_at, Some(record.observed_at));
        assert_eq!(update.idle_since, None);
    }

    #[test]
    fn test_missing_winner_and_other_events_are_rejected() {
        let no_winner = record(EventKind::PrizeTransferApproved, vec![uint(1)]);
        let counter = record(EventKind::TotalQueries, vec![uint(1)]);

        assert!(matches!(lifecycle_update(&no_winner), Err(ListenerError::Handler(_))));
        assert!(matches!(lifecycle_update(&counter), Err(ListenerError::Handler(_))));
    }

    #[tokio::test]
    async fn test_handler_merges_under_binding_address() {
        let store = Arc::new(MemoryStateStore::new());
        let handler = GameLifecycleHandler::new(store.clone());
        let binding = binding(ADDRESS_A);

        handler
            .handle(Network::Testnet, &binding, &record(EventKind::GameStarted, vec![uint(1_700_000_000)]))
            .await
            .unwrap();
        handler
            .handle(Network::Testnet, &binding, &record(EventKind::GameEnded, vec![uint(1_700_000_600), uint(1)]))
            .await
            .unwrap();

        let doc = store.lifecycle(Network::Testnet, binding.address()).await;
        assert_eq!(doc["status"], json!("ended"));
        assert!(doc.contains_key("startedAt"));
        assert!(doc.contains_key("endedAt"));
    }
}
