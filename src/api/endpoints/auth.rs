//! Account endpoints.
//!
//! `POST /auth/signup` — register an email/password account
//! `POST /auth/login` — exchange credentials for a bearer token

use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, Credentials, LoginResponse, SignupResponse};

/// `POST /auth/signup` — 400 on invalid email or password length, 409 on duplicate.
pub async fn signup(
    State(ctx): State<ApiContext>,
    Json(body): Json<Credentials>,
) -> Result<Json<SignupResponse>, ApiError> {
    let core = ctx.core.clone();
    let account =
        tokio::task::spawn_blocking(move || core.auth().signup(&body.email, &body.password))
            .await??;

    Ok(Json(SignupResponse {
        id: account.id.to_string(),
        email: account.email,
    }))
}

/// `POST /auth/login` — 401 on unknown email or wrong password, without saying which.
pub async fn login(
    State(ctx): State<ApiContext>,
    Json(body): Json<Credentials>,
) -> Result<Json<LoginResponse>, ApiError> {
    let core = ctx.core.clone();
    let issued =
        tokio::task::spawn_blocking(move || core.auth().login(&body.email, &body.password))
            .await??;

    Ok(Json(LoginResponse {
        access_token: issued.access_token,
        token_type: "bearer",
    }))
}
