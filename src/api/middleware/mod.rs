//! Middleware for the protected `/med/*` routes.
//!
//! Execution order (outermost → innermost):
//! 1. Auth validator — bearer token to `Identity`
//! 2. Audit logger — logs after auth, has user_id

pub mod audit;
pub mod auth;
