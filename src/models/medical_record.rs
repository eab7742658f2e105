use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-patient profile plus the ordered ids of its history entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalHistoryRecord {
    pub user_id: String,
    pub email: String,
    pub allergy: Option<String>,
    pub chronic_condition: Option<String>,
    pub current_medication: Option<String>,
    pub history: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile fields as exchanged with clients. `None` on update means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MedicalInfo {
    pub allergy: Option<String>,
    pub current_medication: Option<String>,
    pub chronic_condition: Option<String>,
}

impl From<&MedicalHistoryRecord> for MedicalInfo {
    fn from(record: &MedicalHistoryRecord) -> Self {
        Self {
            allergy: record.allergy.clone(),
            current_medication: record.current_medication.clone(),
            chronic_condition: record.chronic_condition.clone(),
        }
    }
}
