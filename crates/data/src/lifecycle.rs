use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Started,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Won,
    Exhausted,
}

/// Partial game lifecycle document. Only the fields that are set are merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<GameStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    /// Prize in ether, as a decimal string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prize: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_player: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_player_reward: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_reward_distributed: Option<String>,
}

impl LifecycleUpdate {
    /// The update as a JSON object holding only its set fields.
    pub fn to_json(&self) -> Result<serde_json::Map<String, serde_json::Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Ok(serde_json::Map::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_fields_are_omitted() {
        let update = LifecycleUpdate {
            status: Some(GameStatus::Ended),
            end_reason: Some(EndReason::Won),
            winner: Some("0xabc".to_string()),
            ..Default::default()
        };

        let json = update.to_json().unwrap();
        assert_eq!(json.len(), 3);
        assert_eq!(json["status"], "ended");
        assert_eq!(json["endReason"], "won");
        assert!(!json.contains_key("startedAt"));
    }
}
