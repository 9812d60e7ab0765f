use crate::error::DomainError;
use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Events emitted by the game contract that the listener knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    QueryFeePaid,
    NextQueryFee,
    CurrentPrizePool,
    TotalQueries,
    GameStarted,
    GameEnded,
    PrizeTransferApproved,
    LastPlayerRewardAfterGameExhaustion,
    RestOfThePlayersRewardAfterGameExhaustion,
    GameResetByOwner,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::QueryFeePaid,
        EventKind::NextQueryFee,
        EventKind::CurrentPrizePool,
        EventKind::TotalQueries,
        EventKind::GameStarted,
        EventKind::GameEnded,
        EventKind::PrizeTransferApproved,
        EventKind::LastPlayerRewardAfterGameExhaustion,
        EventKind::RestOfThePlayersRewardAfterGameExhaustion,
        EventKind::GameResetByOwner,
    ];

    /// Event name as declared in the contract ABI.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::QueryFeePaid => "QueryFeePaid",
            EventKind::NextQueryFee => "NextQueryFee",
            EventKind::CurrentPrizePool => "CurrentPrizePool",
            EventKind::TotalQueries => "TotalQueries",
            EventKind::GameStarted => "GameStarted",
            EventKind::GameEnded => "GameEnded",
            EventKind::PrizeTransferApproved => "PrizeTransferApproved",
            EventKind::LastPlayerRewardAfterGameExhaustion => {
                "LastPlayerRewardAfterGameExhaustion"
            }
            EventKind::RestOfThePlayersRewardAfterGameExhaustion => {
                "RestOfThePlayersRewardAfterGameExhaustion"
            }
            EventKind::GameResetByOwner => "GameResetByOwner",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, DomainError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| DomainError::UnknownEventKind(name.to_string()))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded event argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventValue {
    Address(String),
    Uint(U256),
    /// Signed integers are kept as their decimal representation.
    Int(String),
    Bool(bool),
    Bytes(Vec<u8>),
    FixedBytes(Vec<u8>),
    String(String),
    Array(Vec<EventValue>),
}

impl EventValue {
    pub fn as_uint(&self) -> Option<U256> {
        match self {
            EventValue::Uint(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<&str> {
        match self {
            EventValue::Address(address) => Some(address),
            _ => None,
        }
    }
}

impl fmt::Display for EventValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventValue::Address(address) => f.write_str(address),
            EventValue::Uint(value) => write!(f, "{value}"),
            EventValue::Int(value) | EventValue::String(value) => f.write_str(value),
            EventValue::Bool(value) => write!(f, "{value}"),
            EventValue::Bytes(bytes) | EventValue::FixedBytes(bytes) => {
                f.write_str("0x")?;
                bytes.iter().try_for_each(|b| write!(f, "{b:02x}"))
            }
            EventValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// One decoded log, handed to exactly one handler and then dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_name: EventKind,
    pub args: Vec<EventValue>,
    pub block_number: Option<u64>,
    pub tx_hash: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn arg(&self, index: usize) -> Option<&EventValue> {
        self.args.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_names_roundtrip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.name()).unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_event_kind_is_error() {
        let err = EventKind::from_name("Transfer").unwrap_err();
        assert_eq!(err, DomainError::UnknownEventKind("Transfer".to_string()));
    }

    #[test]
    fn test_event_value_display() {
        assert_eq!(EventValue::Bytes(vec![0xde, 0xad]).to_string(), "0xdead");
        assert_eq!(
            EventValue::Array(vec![EventValue::Uint(U256::from(7)), EventValue::Bool(true)])
                .to_string(),
            "[7, true]"
        );
    }
}
