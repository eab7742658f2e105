pub mod password;
pub mod service;
pub mod token;

pub use password::*;
pub use service::*;
pub use token::*;

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Password must be between {min} and {max} characters")]
    WeakPassword { min: usize, max: usize },

    #[error("Email is already registered")]
    EmailTaken,

    #[error("Incorrect email or password")]
    InvalidCredentials,

    #[error("Missing, invalid or expired access token")]
    Unauthenticated,

    #[error("Stored password hash is malformed")]
    MalformedHash,

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}
