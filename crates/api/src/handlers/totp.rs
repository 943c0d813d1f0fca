use crate::error::ApiError;
use crate::AppState;
use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use stepauth_database::UserRepository;
use stepauth_models::Token;

#[derive(Debug, Deserialize)]
pub struct ConfigureRequest {
    pub code: String,
    #[serde(default)]
    pub is_disabled: bool,
}

/// Provision a TOTP secret for the user and return the otpauth URI for
/// authenticator apps. The factor is not enabled until a code generated
/// from the secret is verified through `configure`.
pub async fn secret(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
) -> Result<Json<Value>, ApiError> {
    let mut user = UserRepository::by_id(state.repo.pool(), token.user_id).await?;

    if user.is_totp_allowed {
        return Err(ApiError::bad_request("TOTP is already enabled"));
    }

    let had_secret = !user.tfa_secret.is_empty();
    let secret = state.otp.totp_secret(&mut user)?;

    if !had_secret {
        UserRepository::update(state.repo.pool(), &user).await?;
    }

    Ok(Json(json!({
        "secret": state.otp.totp_qr_string(&user, &secret),
    })))
}

/// Enable or disable the TOTP factor. Either direction requires a code
/// matching the configured secret.
pub async fn configure(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
    Json(req): Json<ConfigureRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut user = UserRepository::by_id(state.repo.pool(), token.user_id).await?;

    state.otp.validate_totp(&user, &req.code)?;

    user.is_totp_allowed = !req.is_disabled;
    UserRepository::update(state.repo.pool(), &user).await?;

    Ok(Json(json!({})))
}
