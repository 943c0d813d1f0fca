pub mod contact;
pub mod device;
pub mod health;
pub mod login;
pub mod signup;
pub mod token;
pub mod totp;
pub mod user;

use crate::error::ApiError;
use crate::AppState;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use stepauth_models::{is_email_valid, is_phone_valid, DeliveryMethod, LoginHistory, Token, TokenState};

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub state: TokenState,
    pub expires_at: i64,

    /// Present on newly minted tokens only; the client stores it for
    /// `POST /api/v1/token/refresh`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Render a token response: the signed JWT in the body and the plaintext
/// client ID in a secure cookie.
pub(crate) fn token_response(
    state: &AppState,
    token: &Token,
    status: StatusCode,
) -> Result<Response, ApiError> {
    let signed = state.token.sign(token).map_err(ApiError::from)?;
    let cookie = state.token.cookie(token);

    let body = TokenResponse {
        token: signed,
        state: token.state,
        expires_at: token.exp,
        refresh_token: token.refresh_key.clone(),
    };

    let mut response = (status, Json(body)).into_response();
    let value = HeaderValue::from_str(&cookie).map_err(|e| {
        tracing::error!(error = %e, "failed to render client ID cookie");
        ApiError::internal()
    })?;
    response.headers_mut().append(header::SET_COOKIE, value);

    Ok(response)
}

/// The LoginHistory shadow row for a freshly issued authorized token.
pub(crate) fn new_login_history(token: &Token) -> LoginHistory {
    let now = Utc::now();
    LoginHistory {
        token_id: token.jti.clone(),
        user_id: token.user_id,
        is_revoked: false,
        expires_at: token.expires_at(),
        created_at: now,
        updated_at: now,
    }
}

/// Map a request `type`/`delivery_method` discriminator onto a delivery
/// method and the identity attribute it selects.
pub(crate) fn identity_method(kind: &str) -> Result<(DeliveryMethod, &'static str), ApiError> {
    match kind {
        "email" => Ok((DeliveryMethod::Email, "email")),
        "phone" => Ok((DeliveryMethod::Phone, "phone")),
        _ => Err(ApiError::bad_request(
            "identity type must be email or phone",
        )),
    }
}

/// Syntactic validation of a contact address for a delivery method.
pub(crate) fn validate_address(method: DeliveryMethod, address: &str) -> Result<(), ApiError> {
    let valid = match method {
        DeliveryMethod::Email => is_email_valid(address),
        DeliveryMethod::Phone => is_phone_valid(address),
    };

    if valid {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!(
            "{} address is not valid",
            method
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_method_mapping() {
        assert_eq!(identity_method("email").unwrap().1, "email");
        assert_eq!(identity_method("phone").unwrap().1, "phone");
        assert!(identity_method("username").is_err());
    }

    #[test]
    fn test_address_validation_by_method() {
        assert!(validate_address(DeliveryMethod::Email, "jane@example.com").is_ok());
        assert!(validate_address(DeliveryMethod::Email, "+15555551234").is_err());
        assert!(validate_address(DeliveryMethod::Phone, "+15555551234").is_ok());
        assert!(validate_address(DeliveryMethod::Phone, "jane@example.com").is_err());
    }
}
