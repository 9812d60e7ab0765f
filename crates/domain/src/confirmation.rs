use crate::error::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Pending,
    Success,
    Failure,
}

impl ReceiptStatus {
    pub fn from_receipt(success: bool) -> Self {
        if success {
            ReceiptStatus::Success
        } else {
            ReceiptStatus::Failure
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReceiptStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Pending => "pending",
            ReceiptStatus::Success => "success",
            ReceiptStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReceiptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReceiptStatus::Pending),
            "success" => Ok(ReceiptStatus::Success),
            "failure" => Ok(ReceiptStatus::Failure),
            other => Err(format!("unknown receipt status: {other}")),
        }
    }
}

/// Which activity settled a pending confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionSource {
    Push,
    Poll,
    /// Neither path produced a receipt.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRecord {
    pub query_id: String,
    pub transaction_hash: String,
    #[serde(rename = "transactionReceiptStatus")]
    pub receipt_status: ReceiptStatus,
    pub last_modified_at: DateTime<Utc>,
}

/// What a commit should do to the stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitPlan {
    Create(ConfirmationRecord),
    Merge(ConfirmationRecord),
    /// The stored record already holds the outcome.
    Skip,
}

impl ConfirmationRecord {
    pub fn new(query_id: &str, transaction_hash: &str, receipt_status: ReceiptStatus) -> Self {
        Self {
            query_id: query_id.to_string(),
            transaction_hash: transaction_hash.to_string(),
            receipt_status,
            last_modified_at: Utc::now(),
        }
    }

    /// Decides how `(tx_hash, status)` lands on top of `existing`.
    ///
    /// A different stored hash is a hard rejection; a stored `success` is
    /// final; `pending` never overwrites anything that is already there.
    pub fn plan_commit(
        existing: Option<&ConfirmationRecord>,
        query_id: &str,
        tx_hash: &str,
        status: ReceiptStatus,
    ) -> Result<CommitPlan, DomainError> {
        let Some(current) = existing else {
            return Ok(CommitPlan::Create(Self::new(query_id, tx_hash, status)));
        };

        if !current.transaction_hash.eq_ignore_ascii_case(tx_hash) {
            return Err(DomainError::HashMismatch {
                query_id: query_id.to_string(),
                stored: current.transaction_hash.clone(),
                observed: tx_hash.to_string(),
            });
        }

        if current.receipt_status == ReceiptStatus::Success || status == ReceiptStatus::Pending {
            return Ok(CommitPlan::Skip);
        }

        Ok(CommitPlan::Merge(ConfirmationRecord {
            receipt_status: status,
            last_modified_at: Utc::now(),
            ..current.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0xaaaa";

    #[test]
    fn test_plan_creates_when_absent() {
        let plan =
            ConfirmationRecord::plan_commit(None, "7", HASH, ReceiptStatus::Pending).unwrap();
        match plan {
            CommitPlan::Create(record) => {
                assert_eq!(record.query_id, "7");
                assert_eq!(record.receipt_status, ReceiptStatus::Pending);
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn test_plan_rejects_hash_mismatch() {
        let stored = ConfirmationRecord::new("7", HASH, ReceiptStatus::Pending);
        let err = ConfirmationRecord::plan_commit(Some(&stored), "7", "0xbbbb", ReceiptStatus::Success)
            .unwrap_err();
        assert!(matches!(err, DomainError::HashMismatch { .. }));
    }

    #[test]
    fn test_plan_skips_terminal_success() {
        let stored = ConfirmationRecord::new("7", HASH, ReceiptStatus::Success);
        let plan =
            ConfirmationRecord::plan_commit(Some(&stored), "7", HASH, ReceiptStatus::Failure)
                .unwrap();
        assert_eq!(plan, CommitPlan::Skip);
    }

    #[test]
    fn test_plan_pending_never_overwrites() {
        let stored = ConfirmationRecord::new("7", HASH, ReceiptStatus::Failure);
        let plan =
            ConfirmationRecord::plan_commit(Some(&stored), "7", HASH, ReceiptStatus::Pending)
                .unwrap();
        assert_eq!(plan, CommitPlan::Skip);
    }

    #[test]
    fn test_plan_merges_terminal_over_pending() {
        let stored = ConfirmationRecord::new("7", HASH, ReceiptStatus::Pending);
        let plan = ConfirmationRecord::plan_commit(
            Some(&stored),
            "7",
            &HASH.to_uppercase().replacen("0X", "0x", 1),
            ReceiptStatus::Success,
        )
        .unwrap();
        match plan {
            CommitPlan::Merge(record) => {
                assert_eq!(record.receipt_status, ReceiptStatus::Success);
                assert_eq!(record.transaction_hash, HASH);
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn test_record_serializes_with_store_field_names() {
        let record = ConfirmationRecord::new("7", HASH, ReceiptStatus::Success);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["transactionHash"], HASH);
        assert_eq!(json["transactionReceiptStatus"], "success");
        assert!(json.get("lastModifiedAt").is_some());
    }
}
