use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp};
use crate::db::DatabaseError;
use crate::models::{Account, Identity};

/// Insert a new account. A duplicate email surfaces as `ConstraintViolation`.
pub fn insert_account(conn: &Connection, account: &Account) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO accounts (id, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            account.id.to_string(),
            account.email,
            account.password_hash,
            format_timestamp(&account.created_at),
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.code == ErrorCode::ConstraintViolation =>
        {
            DatabaseError::ConstraintViolation("account email already registered".into())
        }
        other => DatabaseError::Sqlite(other),
    })?;
    Ok(())
}

pub fn get_account_by_email(
    conn: &Connection,
    email: &str,
) -> Result<Option<Account>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, email, password_hash, created_at FROM accounts WHERE email = ?1",
            params![email],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((id, email, password_hash, created_at)) => Ok(Some(Account {
            id: Uuid::parse_str(&id)
                .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
            email,
            password_hash,
            created_at: parse_timestamp(&created_at)?,
        })),
        None => Ok(None),
    }
}

pub fn insert_access_token(
    conn: &Connection,
    token_hash: &str,
    owner: &Identity,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO access_tokens (token_hash, user_id, email, issued_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            token_hash,
            owner.user_id,
            owner.email,
            format_timestamp(&issued_at),
            format_timestamp(&expires_at),
        ],
    )?;
    Ok(())
}

/// Resolve a token hash to its identity. Expired tokens resolve to `None`.
pub fn find_identity_by_token(
    conn: &Connection,
    token_hash: &str,
    now: DateTime<Utc>,
) -> Result<Option<Identity>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT user_id, email, expires_at FROM access_tokens WHERE token_hash = ?1",
            params![token_hash],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((user_id, email, expires_at)) = row else {
        return Ok(None);
    };
    if parse_timestamp(&expires_at)? <= now {
        return Ok(None);
    }
    Ok(Some(Identity { user_id, email }))
}

/// Delete tokens past their expiry. Returns the number removed.
pub fn delete_expired_tokens(conn: &Connection, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM access_tokens WHERE expires_at <= ?1",
        params![format_timestamp(&now)],
    )?;
    Ok(removed)
}
