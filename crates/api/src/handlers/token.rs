use crate::error::ApiError;
use crate::handlers::{new_login_history, token_response};
use crate::middleware::auth::{bearer_token, client_id_cookie};
use crate::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use stepauth_auth::AuthError;
use stepauth_database::LoginHistoryRepository;
use stepauth_models::{Token, TokenState};

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Revoke a token belonging to the caller. The LoginHistory row is
/// marked first; the Redis marker makes the revocation effective for
/// validation immediately afterwards.
pub async fn revoke(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
    Json(req): Json<RevokeRequest>,
) -> Result<Json<Value>, ApiError> {
    let user_id = token.user_id;
    let token_id = req.token_id.clone();

    let record = state
        .repo
        .with_atomic(move |tx| {
            Box::pin(async move {
                let mut record = LoginHistoryRepository::get_for_update(&mut **tx, &token_id)
                    .await
                    .map_err(AuthError::from)?;

                if record.user_id != user_id {
                    return Err(AuthError::NotFound("token not found".to_string()));
                }

                record.is_revoked = true;
                let record = LoginHistoryRepository::update(&mut **tx, &record)
                    .await
                    .map_err(AuthError::from)?;

                Ok::<_, AuthError>(record)
            })
        })
        .await?;

    let remaining = (record.expires_at - Utc::now()).num_seconds().max(1) as u64;
    state.token.revoke(&req.token_id, remaining).await?;

    Ok(Json(json!({})))
}

/// Report whether the presented token is valid. Reaching the handler at
/// all means the middleware accepted it.
pub async fn verify(Extension(_token): Extension<Token>) -> Json<Value> {
    Json(json!({ "is_valid": true }))
}

/// Exchange an expiring token for a fresh authorized one. The access
/// token may already be expired; validity is governed by the refresh
/// window embedded in the token, so this endpoint authenticates the
/// bearer itself instead of using the standard middleware.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RefreshRequest>,
) -> Result<Response, ApiError> {
    let signed = bearer_token(&headers)?;
    let client_id = client_id_cookie(&headers)?;

    let token = state.token.validate_for_refresh(&signed, &client_id).await?;

    if token.state != TokenState::Authorized {
        return Err(ApiError::unauthorized(
            "only authorized tokens may be refreshed",
        ));
    }

    let new_token = state.token.refresh(&token, &req.refresh_token).await?;
    LoginHistoryRepository::create(state.repo.pool(), &new_login_history(&new_token)).await?;

    token_response(&state, &new_token, StatusCode::OK)
}
