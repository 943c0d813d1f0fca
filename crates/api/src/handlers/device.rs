use crate::error::ApiError;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use stepauth_auth::AuthError;
use stepauth_database::{DeviceRepository, UserRepository};
use stepauth_models::{Device, Token};
use uuid::Uuid;
use webauthn_rs::prelude::{CreationChallengeResponse, RegisterPublicKeyCredential};

const DEFAULT_DEVICE_NAME: &str = "Security Key";

/// Begin a WebAuthn registration ceremony for a new device.
pub async fn create(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
) -> Result<Json<CreationChallengeResponse>, ApiError> {
    let user = UserRepository::by_id(state.repo.pool(), token.user_id).await?;
    let challenge = state.webauthn.begin_sign_up(&user).await?;
    Ok(Json(challenge))
}

/// Finish a registration ceremony and persist the new device. Enables
/// the device factor for the user.
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
    Json(credential): Json<RegisterPublicKeyCredential>,
) -> Result<(StatusCode, Json<Device>), ApiError> {
    let user = UserRepository::by_id(state.repo.pool(), token.user_id).await?;

    let device = state
        .webauthn
        .finish_sign_up(&user, DEFAULT_DEVICE_NAME, &credential)
        .await?;

    Ok((StatusCode::CREATED, Json(device)))
}

/// Remove a device. A user may not drop their only remaining second
/// factor this way; removing the last device clears the device factor
/// flag.
pub async fn remove(
    State(state): State<Arc<AppState>>,
    Extension(token): Extension<Token>,
    Path(device_id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let user_id = token.user_id;

    state
        .repo
        .with_atomic(move |tx| {
            Box::pin(async move {
                let mut user = UserRepository::get_for_update(&mut **tx, user_id)
                    .await
                    .map_err(AuthError::from)?;
                let devices = DeviceRepository::by_user_id(&mut **tx, user_id)
                    .await
                    .map_err(AuthError::from)?;

                if !devices.iter().any(|d| d.id == device_id) {
                    return Err(AuthError::NotFound("device not found".to_string()));
                }

                let last_device = devices.len() == 1;
                if last_device && user.is_device_allowed && user.enabled_factor_count() == 1 {
                    return Err(AuthError::BadRequest(
                        "cannot remove the only remaining authentication factor".to_string(),
                    ));
                }

                DeviceRepository::remove(&mut **tx, device_id, user_id)
                    .await
                    .map_err(AuthError::from)?;

                if last_device {
                    user.is_device_allowed = false;
                    UserRepository::update(&mut **tx, &user)
                        .await
                        .map_err(AuthError::from)?;
                }

                Ok::<_, AuthError>(())
            })
        })
        .await?;

    Ok(Json(json!({})))
}
