use std::str::FromStr;

use chrono::Utc;
use rusqlite::{params, Connection, TransactionBehavior};
use uuid::Uuid;

use super::{ensure_medical_record, format_timestamp, parse_timestamp};
use crate::db::DatabaseError;
use crate::models::{EntryType, HistoryEntry, Identity};

/// Append `entry` to the owner's history, creating the record first if needed.
///
/// Runs as a single `BEGIN IMMEDIATE` transaction: the write lock is taken
/// before the next sequence number is read, so concurrent appends to the same
/// record are serialized and none are lost. Returns the entry's position (1-based).
pub fn append_history_entry(
    conn: &mut Connection,
    owner: &Identity,
    entry: &HistoryEntry,
) -> Result<i64, DatabaseError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    ensure_medical_record(&tx, owner)?;

    let seq: i64 = tx.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM history_entries WHERE user_id = ?1",
        params![owner.user_id],
        |row| row.get(0),
    )?;

    tx.execute(
        "INSERT INTO history_entries (id, user_id, seq, image_ref, created_at, entry_type, response)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.id.to_string(),
            owner.user_id,
            seq,
            entry.image_reference,
            format_timestamp(&entry.timestamp),
            entry.entry_type.as_str(),
            serde_json::to_string(&entry.response_payload)?,
        ],
    )?;

    tx.execute(
        "UPDATE medical_records SET updated_at = ?2 WHERE user_id = ?1",
        params![owner.user_id, format_timestamp(&Utc::now())],
    )?;

    tx.commit()?;
    Ok(seq)
}

/// All entries of a user's history in append order. Unknown users get an empty list.
pub fn list_history_entries(
    conn: &Connection,
    user_id: &str,
) -> Result<Vec<HistoryEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, image_ref, created_at, entry_type, response
         FROM history_entries WHERE user_id = ?1 ORDER BY seq ASC",
    )?;

    let rows = stmt.query_map(params![user_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (id, image_reference, created_at, entry_type, response) = row?;
        entries.push(HistoryEntry {
            id: Uuid::parse_str(&id)
                .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
            image_reference,
            timestamp: parse_timestamp(&created_at)?,
            entry_type: EntryType::from_str(&entry_type)?,
            response_payload: serde_json::from_str(&response)?,
        });
    }
    Ok(entries)
}
