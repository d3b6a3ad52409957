use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::draft::DraftId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationKey(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionOperation {
    Deliver,
    Execute,
}

impl CompletionOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deliver => "deliver",
            Self::Execute => "execute",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "deliver" => Some(Self::Deliver),
            "execute" => Some(Self::Execute),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionRecordState {
    Reserved,
    Completed,
    Failed,
}

impl CompletionRecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reserved" => Some(Self::Reserved),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One guarded side effect (a delivery or an execution) for a draft.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub operation_key: OperationKey,
    pub draft_id: DraftId,
    pub operation: CompletionOperation,
    pub state: CompletionRecordState,
    pub attempt_count: u32,
    pub result_reference: Option<String>,
    pub last_error: Option<String>,
    pub correlation_id: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}
