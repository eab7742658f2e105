use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use super::{generate_token, hash_password, hash_token, token_lifetime, verify_password, AuthError};
use crate::db::{self, DatabaseError};
use crate::models::{Account, Identity};

const MIN_PASSWORD_CHARS: usize = 8;
const MAX_PASSWORD_CHARS: usize = 128;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap()
});

/// A freshly issued bearer token. Only the hash is stored.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Account registration, login and bearer-token resolution. Blocking.
pub struct AuthService {
    db_path: PathBuf,
    password_iterations: u32,
}

impl AuthService {
    pub fn new(db_path: &Path, password_iterations: u32) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            password_iterations,
        }
    }

    pub fn signup(&self, email: &str, password: &str) -> Result<Account, AuthError> {
        let email = normalize_email(email)?;
        let chars = password.chars().count();
        if !(MIN_PASSWORD_CHARS..=MAX_PASSWORD_CHARS).contains(&chars) {
            return Err(AuthError::WeakPassword {
                min: MIN_PASSWORD_CHARS,
                max: MAX_PASSWORD_CHARS,
            });
        }

        let account = Account {
            id: Uuid::new_v4(),
            email,
            password_hash: hash_password(password, self.password_iterations),
            created_at: Utc::now(),
        };

        let conn = db::open_database(&self.db_path)?;
        db::insert_account(&conn, &account).map_err(|e| match e {
            DatabaseError::ConstraintViolation(_) => AuthError::EmailTaken,
            other => AuthError::Database(other),
        })?;

        tracing::info!(user_id = %account.id, "Account created");
        Ok(account)
    }

    pub fn login(&self, email: &str, password: &str) -> Result<IssuedToken, AuthError> {
        let email = normalize_email(email).map_err(|_| AuthError::InvalidCredentials)?;
        let conn = db::open_database(&self.db_path)?;

        let Some(account) = db::get_account_by_email(&conn, &email)? else {
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_password(password, &account.password_hash)? {
            tracing::info!(user_id = %account.id, "Login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        let now = Utc::now();
        let token = generate_token();
        let identity = Identity {
            user_id: account.id.to_string(),
            email: account.email.clone(),
        };
        let expires_at = now + token_lifetime();
        db::insert_access_token(&conn, &hash_token(&token), &identity, now, expires_at)?;

        let purged = db::delete_expired_tokens(&conn, now)?;
        tracing::info!(user_id = %account.id, purged, "Access token issued");

        Ok(IssuedToken {
            access_token: token,
            expires_at,
        })
    }

    /// Resolve a bearer token to its owner.
    pub fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Unauthenticated);
        }
        let conn = db::open_database(&self.db_path)?;
        db::find_identity_by_token(&conn, &hash_token(token), Utc::now())?
            .ok_or(AuthError::Unauthenticated)
    }
}

/// Trim and lower-case; reject anything that is not `local@domain.tld`.
pub fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    if email.len() > 254 || !EMAIL_RE.is_match(&email) {
        return Err(AuthError::InvalidEmail);
    }
    Ok(email)
}
