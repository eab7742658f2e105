use std::path::{Path, PathBuf};

use super::{
    append_history_entry, get_medical_record, list_history_entries, open_database,
    upsert_medical_info, DatabaseError,
};
use crate::models::{HistoryEntry, Identity, MedicalHistoryRecord, MedicalInfo};

/// Document persistence for patient records and their history.
pub trait RecordStore: Send + Sync {
    fn find_by_user(&self, user_id: &str) -> Result<Option<MedicalHistoryRecord>, DatabaseError>;

    /// Atomically push `entry` onto the owner's history, creating the record if absent.
    fn append_entry(&self, owner: &Identity, entry: &HistoryEntry) -> Result<(), DatabaseError>;

    fn update_medical_info(&self, owner: &Identity, info: &MedicalInfo)
        -> Result<(), DatabaseError>;

    fn list_history(&self, user_id: &str) -> Result<Vec<HistoryEntry>, DatabaseError>;
}

/// SQLite-backed store. Each call opens its own connection, so the store is
/// shareable across blocking worker threads without a connection lock.
pub struct SqliteRecordStore {
    db_path: PathBuf,
}

impl SqliteRecordStore {
    /// Open (and migrate) the database once up front so startup fails fast.
    pub fn open(db_path: &Path) -> Result<Self, DatabaseError> {
        open_database(db_path)?;
        Ok(Self {
            db_path: db_path.to_path_buf(),
        })
    }
}

impl RecordStore for SqliteRecordStore {
    fn find_by_user(&self, user_id: &str) -> Result<Option<MedicalHistoryRecord>, DatabaseError> {
        let conn = open_database(&self.db_path)?;
        get_medical_record(&conn, user_id)
    }

    fn append_entry(&self, owner: &Identity, entry: &HistoryEntry) -> Result<(), DatabaseError> {
        let mut conn = open_database(&self.db_path)?;
        let seq = append_history_entry(&mut conn, owner, entry)?;
        tracing::debug!(entry_id = %entry.id, seq, "History entry appended");
        Ok(())
    }

    fn update_medical_info(
        &self,
        owner: &Identity,
        info: &MedicalInfo,
    ) -> Result<(), DatabaseError> {
        let conn = open_database(&self.db_path)?;
        upsert_medical_info(&conn, owner, info)
    }

    fn list_history(&self, user_id: &str) -> Result<Vec<HistoryEntry>, DatabaseError> {
        let conn = open_database(&self.db_path)?;
        list_history_entries(&conn, user_id)
    }
}
