use crate::error::ApiError;
use crate::handlers::{identity_method, new_login_history, token_response, validate_address};
use crate::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::Response,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use stepauth_auth::{AuthError, OtpMarker};
use stepauth_database::{LoginHistoryRepository, UserRepository};
use stepauth_models::{DeliveryMethod, Token, TokenState};

#[derive(Debug, Deserialize)]
pub struct CheckAddressRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub code: String,
    #[serde(default)]
    pub is_disabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct DisableRequest {
    pub delivery_method: DeliveryMethod,
}

#[derive(Debug, Deserialize)]
pub struct RemoveRequest {
    pub delivery_method: DeliveryMethod,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub delivery_method: DeliveryMethod,
}

/// Dispatch an OTP code to a candidate address. The address is bound to
/// the profile only after `verify` confirms the code.
pub async fn check_address(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
    Json(req): Json<CheckAddressRequest>,
) -> Result<Json<Value>, ApiError> {
    let (method, _) = identity_method(&req.kind)?;
    validate_address(method, &req.address)?;

    let user = UserRepository::by_id(state.repo.pool(), token.user_id).await?;
    let (code, _) = state.token.issue_otp(&user, method, &req.address).await?;
    state.messaging.send_otp(&code, &req.address, method)?;

    Ok(Json(json!({})))
}

/// Verify an OTP code sent to an email or phone. A new address is set on
/// the profile; verified addresses are enabled for future OTP delivery
/// unless the client says otherwise.
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
    Json(req): Json<VerifyRequest>,
) -> Result<Response, ApiError> {
    let mut consumed: Option<(DeliveryMethod, OtpMarker)> = None;
    for method in [DeliveryMethod::Email, DeliveryMethod::Phone] {
        if let Some(marker) = state.token.issued_code(token.user_id, method).await? {
            if state.otp.validate_otp(&req.code, &marker.hash).is_ok() {
                let marker = state
                    .token
                    .consume_otp(token.user_id, method, &marker.hash)
                    .await?;
                consumed = Some((method, marker));
                break;
            }
        }
    }

    let (method, marker) =
        consumed.ok_or_else(|| ApiError::invalid_token("incorrect code provided"))?;

    let token_svc = state.token.clone();
    let user_id = token.user_id;
    let enable_otp = !req.is_disabled;

    let new_token = state
        .repo
        .with_atomic(move |tx| {
            Box::pin(async move {
                let mut user = UserRepository::get_for_update(&mut **tx, user_id)
                    .await
                    .map_err(AuthError::from)?;

                match method {
                    DeliveryMethod::Email => {
                        user.email = Some(marker.address);
                        user.is_email_otp_allowed = enable_otp;
                    }
                    DeliveryMethod::Phone => {
                        user.phone = Some(marker.address);
                        user.is_phone_otp_allowed = enable_otp;
                    }
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

/// Stop a verified address from receiving OTP codes.
pub async fn disable(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
    Json(req): Json<DisableRequest>,
) -> Result<Json<Value>, ApiError> {
    UserRepository::disable_otp(state.repo.pool(), token.user_id, req.delivery_method).await?;
    Ok(Json(json!({})))
}

/// Remove a contact address from the profile entirely. Password gated;
/// the other contact must remain populated.
pub async fn remove(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
    Json(req): Json<RemoveRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = UserRepository::by_id(state.repo.pool(), token.user_id).await?;
    state.password.validate(&req.password, &user.password_hash)?;

    UserRepository::remove_delivery_method(state.repo.pool(), token.user_id, req.delivery_method)
        .await?;

    Ok(Json(json!({})))
}

/// Dispatch an OTP code over a channel the user has already enabled.
pub async fn send(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
    Json(req): Json<SendRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = UserRepository::by_id(state.repo.pool(), token.user_id).await?;

    let allowed = match req.delivery_method {
        DeliveryMethod::Email => user.is_email_otp_allowed,
        DeliveryMethod::Phone => user.is_phone_otp_allowed,
    };
    if !allowed {
        return Err(ApiError::unauthorized(
            "delivery method is not enabled for OTP codes",
        ));
    }

    let address = user
        .address(req.delivery_method)
        .ok_or_else(|| {
            ApiError::bad_request(format!(
                "user has no {} address configured",
                req.delivery_method
            ))
        })?
        .to_string();

    let (code, _) = state
        .token
        .issue_otp(&user, req.delivery_method, &address)
        .await?;
    state.messaging.send_otp(&code, &address, req.delivery_method)?;

    Ok(Json(json!({})))
}
