use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Opaque contract interface (a JSON ABI array).
///
/// The config document may hold either the bare array or an object with an
/// `abi` field, so both shapes are accepted and normalised to the array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterfaceDescriptor(Arc<serde_json::Value>);

impl InterfaceDescriptor {
    pub fn from_json(value: serde_json::Value) -> Result<Self, DomainError> {
        let abi = match value {
            serde_json::Value::Array(_) => value,
            serde_json::Value::Object(mut map) => match map.remove("abi") {
                Some(inner @ serde_json::Value::Array(_)) => inner,
                _ => {
                    return Err(DomainError::InvalidDescriptor(
                        "object descriptor without an `abi` array".to_string(),
                    ));
                }
            },
            other => {
                return Err(DomainError::InvalidDescriptor(format!(
                    "expected a JSON array, got {}",
                    json_kind(&other)
                )));
            }
        };

        if abi.as_array().is_some_and(|items| items.is_empty()) {
            return Err(DomainError::InvalidDescriptor("empty ABI".to_string()));
        }

        Ok(Self(Arc::new(abi)))
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Trims and validates a `0x`-prefixed 20-byte hex address.
pub fn normalize_address(raw: &str) -> Result<String, DomainError> {
    let trimmed = raw.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| DomainError::InvalidAddress(trimmed.to_string()))?;

    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DomainError::InvalidAddress(trimmed.to_string()));
    }

    Ok(format!("0x{hex}"))
}

/// The contract the listener currently decodes events against.
///
/// Immutable: a rebind produces a new value through [`ContractBinding::successor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractBinding {
    address: String,
    interface: InterfaceDescriptor,
    version: u64,
}

impl ContractBinding {
    pub fn initial(address: &str, interface: InterfaceDescriptor) -> Result<Self, DomainError> {
        Ok(Self {
            address: normalize_address(address)?,
            interface,
            version: 1,
        })
    }

    pub fn successor(
        &self,
        address: &str,
        interface: InterfaceDescriptor,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            address: normalize_address(address)?,
            interface,
            version: self.version + 1,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn interface(&self) -> &InterfaceDescriptor {
        &self.interface
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn same_address(&self, other: &str) -> bool {
        self.address.eq_ignore_ascii_case(other.trim())
    }
}
