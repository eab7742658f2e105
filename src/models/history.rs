use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::EntryType;

/// One immutable audit record of a single analysis attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub image_reference: String,
    pub timestamp: DateTime<Utc>,
    pub entry_type: EntryType,
    pub response_payload: serde_json::Value,
}

impl HistoryEntry {
    pub fn new(
        image_reference: String,
        entry_type: EntryType,
        response_payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            image_reference,
            timestamp: Utc::now(),
            entry_type,
            response_payload,
        }
    }
}
