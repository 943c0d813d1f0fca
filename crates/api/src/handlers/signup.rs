use crate::error::ApiError;
use crate::handlers::{identity_method, new_login_history, token_response, validate_address};
use crate::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::Response,
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use stepauth_auth::AuthError;
use stepauth_database::{DatabaseError, LoginHistoryRepository, UserRepository};
use stepauth_models::{DeliveryMethod, Token, TokenState, User};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub identity: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub code: String,
}

/// Initial registration step: identify a user by email or phone and
/// issue a pre-authorized token carrying an OTP for the declared
/// identity. An unverified user with the same identity is replaced
/// wholesale; a verified one is a conflict.
pub async fn sign_up(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignUpRequest>,
) -> Result<Response, ApiError> {
    let (method, attribute) = identity_method(&req.kind)?;
    validate_address(method, &req.identity)?;
    state.password.ok_for_user(&req.password)?;

    let password_hash = state.password.hash(&req.password)?;
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        phone: (method == DeliveryMethod::Phone).then(|| req.identity.clone()),
        email: (method == DeliveryMethod::Email).then(|| req.identity.clone()),
        password_hash,
        tfa_secret: String::new(),
        is_phone_otp_allowed: false,
        is_email_otp_allowed: false,
        is_totp_allowed: false,
        is_device_allowed: false,
        is_verified: false,
        created_at: now,
        updated_at: now,
    };

    let user = match UserRepository::by_identity(state.repo.pool(), attribute, &req.identity).await
    {
        Ok(existing) if existing.is_verified => {
            return Err(ApiError::bad_request("user already exists"));
        }
        Ok(existing) => {
            UserRepository::re_create(state.repo.pool(), existing.id, &user).await?
        }
        Err(DatabaseError::NotFound(_)) => {
            UserRepository::create(state.repo.pool(), &user).await?
        }
        Err(err) => return Err(err.into()),
    };

    let token = state
        .token
        .create_with_otp(&user, TokenState::PreAuthorized, method)
        .await?;

    if let (Some(code), Some(address)) = (&token.code, &token.otp_address) {
        state.messaging.send_otp(code, address, method)?;
    }

    token_response(&state, &token, StatusCode::CREATED)
}

/// Final registration step: validate the delivered code, mark the user
/// verified, enable the matching OTP channel, and escalate to an
/// authorized token.
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
    Json(req): Json<VerifyRequest>,
) -> Result<Response, ApiError> {
    let code_hash = token
        .code_hash
        .clone()
        .ok_or_else(|| ApiError::bad_request("token carries no verification code"))?;
    let method = token
        .otp_method
        .ok_or_else(|| ApiError::bad_request("token carries no verification code"))?;

    state.otp.validate_otp(&req.code, &code_hash)?;
    state
        .token
        .consume_otp(token.user_id, method, &code_hash)
        .await?;

    let token_svc = state.token.clone();
    let user_id = token.user_id;

    let new_token = state
        .repo
        .with_atomic(move |tx| {
            Box::pin(async move {
                let mut user = UserRepository::get_for_update(&mut **tx, user_id)
                    .await
                    .map_err(AuthError::from)?;

                user.is_verified = true;
                match method {
                    DeliveryMethod::Email => user.is_email_otp_allowed = true,
                    DeliveryMethod::Phone => user.is_phone_otp_allowed = true,
                }

                let user = UserRepository::update(&mut **tx, &user)
                    .await
                    .map_err(AuthError::from)?;

                let new_token = token_svc.create(&user, TokenState::Authorized)?;
                LoginHistoryRepository::create(&mut **tx, &new_login_history(&new_token))
                    .await
                    .map_err(AuthError::from)?;

                Ok::<_, AuthError>(new_token)
            })
        })
        .await?;

    token_response(&state, &new_token, StatusCode::OK)
}
