use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp};
use crate::db::DatabaseError;
use crate::models::{Identity, MedicalHistoryRecord, MedicalInfo};

/// Fetch a patient's record together with the ordered ids of its history entries.
pub fn get_medical_record(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<MedicalHistoryRecord>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT user_id, email, allergy, chronic_condition, current_medication, created_at, updated_at
             FROM medical_records WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )
        .optional()?;

    let Some((user_id, email, allergy, chronic_condition, current_medication, created, updated)) =
        row
    else {
        return Ok(None);
    };

    let mut stmt =
        conn.prepare("SELECT id FROM history_entries WHERE user_id = ?1 ORDER BY seq ASC")?;
    let ids = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
    let mut history = Vec::new();
    for id in ids {
        let id = id?;
        history.push(
            Uuid::parse_str(&id)
                .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        );
    }

    Ok(Some(MedicalHistoryRecord {
        user_id,
        email,
        allergy,
        chronic_condition,
        current_medication,
        history,
        created_at: parse_timestamp(&created)?,
        updated_at: parse_timestamp(&updated)?,
    }))
}

/// Create the record for `owner` if it does not exist yet. Existing rows are untouched.
pub fn ensure_medical_record(conn: &Connection, owner: &Identity) -> Result<(), DatabaseError> {
    let now = format_timestamp(&Utc::now());
    conn.execute(
        "INSERT INTO medical_records (user_id, email, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT(user_id) DO NOTHING",
        params![owner.user_id, owner.email, now],
    )?;
    Ok(())
}

/// Insert or patch the profile fields. Fields passed as `None` keep their stored value.
pub fn upsert_medical_info(
    conn: &Connection,
    owner: &Identity,
    info: &MedicalInfo,
) -> Result<(), DatabaseError> {
    let now = format_timestamp(&Utc::now());
    conn.execute(
        "INSERT INTO medical_records
             (user_id, email, allergy, chronic_condition, current_medication, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT(user_id) DO UPDATE SET
             allergy = COALESCE(excluded.allergy, medical_records.allergy),
             chronic_condition = COALESCE(excluded.chronic_condition, medical_records.chronic_condition),
             current_medication = COALESCE(excluded.current_medication, medical_records.current_medication),
             updated_at = excluded.updated_at",
        params![
            owner.user_id,
            owner.email,
            info.allergy,
            info.chronic_condition,
            info.current_medication,
            now,
        ],
    )?;
    Ok(())
}
