//! Dynamic event decoding against a JSON ABI.

use crate::error::ProtocolError;
use crate::types::RawLog;
use alloy::dyn_abi::{DynSolValue, EventExt};
use alloy::json_abi::{Event, JsonAbi};
use alloy::primitives::B256;
use chainwatch_domain::{EventKind, EventValue, InterfaceDescriptor};
use primitive_types::U256;
use std::collections::HashMap;
use tracing::debug;

/// Decodes raw logs into [`EventKind`]s and typed arguments.
///
/// Built once per binding. Only non-anonymous events whose names belong to
/// [`EventKind`] are indexed; every other log is reported as undecodable.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    by_topic: HashMap<B256, (EventKind, Event)>,
}

impl EventDecoder {
    pub fn from_descriptor(descriptor: &InterfaceDescriptor) -> Result<Self, ProtocolError> {
        let abi: JsonAbi = serde_json::from_value(descriptor.as_json().clone())
            .map_err(|e| ProtocolError::InvalidAbi(e.to_string()))?;

        let mut by_topic = HashMap::new();
        for event in abi.events() {
            if event.anonymous {
                continue;
            }
            match EventKind::from_name(&event.name) {
                Ok(kind) => {
                    by_topic.insert(event.selector(), (kind, event.clone()));
                }
                Err(_) => debug!(event = %event.name, "Skipping event outside the routed set"),
            }
        }

        Ok(Self { by_topic })
    }

    /// Event kinds present in the ABI.
    pub fn kinds(&self) -> Vec<EventKind> {
        let mut kinds: Vec<EventKind> = self.by_topic.values().map(|(kind, _)| *kind).collect();
        kinds.sort();
        kinds
    }

    /// Topic 0 for `kind`, if the ABI declares it.
    pub fn topic_for(&self, kind: EventKind) -> Option<B256> {
        self.by_topic
            .iter()
            .find(|(_, (k, _))| *k == kind)
            .map(|(topic, _)| *topic)
    }

    pub fn decode(&self, log: &RawLog) -> Result<(EventKind, Vec<EventValue>), ProtocolError> {
        let topic0 = log
            .topics
            .first()
            .ok_or_else(|| ProtocolError::Decode("log has no topics".to_string()))?;
        let (kind, event) = self
            .by_topic
            .get(topic0)
            .ok_or_else(|| ProtocolError::Decode(format!("unknown event topic {topic0}")))?;

        let decoded = event
            .decode_log_parts(log.topics.iter().copied(), &log.data)
            .map_err(|e| ProtocolError::Decode(format!("{kind}: {e}")))?;

        // Re-interleave indexed and body values into declaration order.
        let mut indexed = decoded.indexed.into_iter();
        let mut body = decoded.body.into_iter();
        let mut args = Vec::with_capacity(event.inputs.len());
        for input in &event.inputs {
            let next = if input.indexed {
                indexed.next()
            } else {
                body.next()
            };
            let value = next.ok_or_else(|| {
                ProtocolError::Decode(format!("{kind}: missing value for `{}`", input.name))
            })?;
            args.push(to_event_value(value));
        }

        Ok((*kind, args))
    }
}

fn to_event_value(value: DynSolValue) -> EventValue {
    match value {
        DynSolValue::Address(address) => EventValue::Address(address.to_checksum(None)),
        DynSolValue::Uint(v, _) => EventValue::Uint(U256::from_big_endian(&v.to_be_bytes::<32>())),
        DynSolValue::Int(v, _) => EventValue::Int(v.to_string()),
        DynSolValue::Bool(b) => EventValue::Bool(b),
        DynSolValue::FixedBytes(word, size) => EventValue::FixedBytes(word[..size].to_vec()),
        DynSolValue::Bytes(bytes) => EventValue::Bytes(bytes),
        DynSolValue::String(s) => EventValue::String(s),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            EventValue::Array(items.into_iter().map(to_event_value).collect())
        }
        other => EventValue::Bytes(other.abi_encode()),
    }
}
