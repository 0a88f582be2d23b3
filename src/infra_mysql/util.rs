use crate::domain_port::StoreError;
use sqlx::mysql::MySqlDatabaseError;
use uuid::Uuid;

pub fn is_dup_key(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db) = err {
        if let Some(mysql_err) = db.try_downcast_ref::<MySqlDatabaseError>() {
            return mysql_err.number() == 1062; // ER_DUP_ENTRY
        }
    }

    false
}

/// Maps a driver error onto the store taxonomy.
pub fn classify(err: sqlx::Error) -> StoreError {
    if is_dup_key(&err) {
        return StoreError::ConstraintViolation(err.to_string());
    }
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        other => StoreError::Transient(other.to_string()),
    }
}

#[inline]
pub fn uuid_from_bytes(bytes: &[u8]) -> Result<Uuid, StoreError> {
    Uuid::from_slice(bytes).map_err(|e| StoreError::Transient(format!("bad uuid column: {e}")))
}
