use crate::error::ApiError;
use crate::AppState;
use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use stepauth_database::UserRepository;
use stepauth_models::Token;

#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Change the caller's password. The current password must verify before
/// the new hash is stored.
pub async fn update_password(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
    Json(req): Json<UpdatePasswordRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut user = UserRepository::by_id(state.repo.pool(), token.user_id).await?;

    state
        .password
        .validate(&req.current_password, &user.password_hash)?;
    state.password.ok_for_user(&req.new_password)?;

    user.password_hash = state.password.hash(&req.new_password)?;
    UserRepository::update(state.repo.pool(), &user).await?;

    Ok(Json(json!({})))
}
