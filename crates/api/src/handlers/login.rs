use crate::error::ApiError;
use crate::handlers::{identity_method, new_login_history, token_response};
use crate::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::Response,
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;
use stepauth_auth::AuthError;
use stepauth_database::{DatabaseError, LoginHistoryRepository, UserRepository};
use stepauth_models::{Token, TokenState};
use webauthn_rs::prelude::{PublicKeyCredential, RequestChallengeResponse};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub identity: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyCodeRequest {
    pub code: String,
}

/// Initial login step: verify the password and issue either an
/// authorized token (no second factor enrolled) or a pre-authorized
/// token listing the user's TFA options. An OTP is dispatched
/// immediately only when OTP is the user's strongest enabled factor.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let (_, attribute) = identity_method(&req.kind)?;

    let user = match UserRepository::by_identity(state.repo.pool(), attribute, &req.identity).await
    {
        Ok(user) => user,
        // Indistinguishable from a bad password on purpose.
        Err(DatabaseError::NotFound(_)) => {
            return Err(ApiError::bad_request("invalid username or password"));
        }
        Err(err) => return Err(err.into()),
    };

    if let Err(err) = state.password.validate(&req.password, &user.password_hash) {
        return Err(match err {
            AuthError::InvalidCredentials => ApiError::bad_request("invalid username or password"),
            other => other.into(),
        });
    }

    if !user.is_verified {
        return Err(ApiError::bad_request("user is not verified"));
    }

    if user.tfa_options().is_empty() {
        let token = state.token.create(&user, TokenState::Authorized)?;
        LoginHistoryRepository::create(state.repo.pool(), &new_login_history(&token)).await?;
        return token_response(&state, &token, StatusCode::OK);
    }

    let token = if user.can_send_default_otp() {
        let method = user.default_otp_delivery();
        let token = state
            .token
            .create_with_otp(&user, TokenState::PreAuthorized, method)
            .await?;

        if let (Some(code), Some(address)) = (&token.code, &token.otp_address) {
            state.messaging.send_otp(code, address, method)?;
        }

        token
    } else {
        state.token.create(&user, TokenState::PreAuthorized)?
    };

    token_response(&state, &token, StatusCode::OK)
}

/// Second login step for OTP and TOTP factors: validate the submitted
/// code and escalate to an authorized token.
pub async fn verify_code(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
    Json(req): Json<VerifyCodeRequest>,
) -> Result<Response, ApiError> {
    let user = UserRepository::by_id(state.repo.pool(), token.user_id).await?;

    let mut verified = false;
    if let (Some(hash), Some(method)) = (&token.code_hash, token.otp_method) {
        if state.otp.validate_otp(&req.code, hash).is_ok() {
            state.token.consume_otp(token.user_id, method, hash).await?;
            verified = true;
        }
    }

    if !verified {
        if !user.is_totp_allowed {
            return Err(ApiError::invalid_token("incorrect code provided"));
        }
        state.otp.validate_totp(&user, &req.code)?;
    }

    let new_token = state.token.create(&user, TokenState::Authorized)?;
    LoginHistoryRepository::create(state.repo.pool(), &new_login_history(&new_token)).await?;

    token_response(&state, &new_token, StatusCode::OK)
}

/// Retrieve a WebAuthn assertion challenge for the user's registered
/// devices.
pub async fn device_challenge(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
) -> Result<Json<RequestChallengeResponse>, ApiError> {
    let user = UserRepository::by_id(state.repo.pool(), token.user_id).await?;

    if !user.is_device_allowed {
        return Err(ApiError::unauthorized(
            "device authentication is not enabled",
        ));
    }

    let challenge = state.webauthn.begin_login(&user).await?;
    Ok(Json(challenge))
}

/// Second login step for the device factor: verify the assertion and
/// escalate to an authorized token.
pub async fn verify_device(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
    Json(credential): Json<PublicKeyCredential>,
) -> Result<Response, ApiError> {
    let user = UserRepository::by_id(state.repo.pool(), token.user_id).await?;

    state.webauthn.finish_login(&user, &credential).await?;

    let new_token = state.token.create(&user, TokenState::Authorized)?;
    LoginHistoryRepository::create(state.repo.pool(), &new_login_history(&new_token)).await?;

    token_response(&state, &new_token, StatusCode::OK)
}
