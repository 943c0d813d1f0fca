use crate::error::{AuthError, Result};
use chrono::Utc;
use std::sync::Arc;
use stepauth_cache::{webauthn_key, Cache};
use stepauth_database::{DeviceRepository, RepositoryManager, UserRepository};
use stepauth_models::{Device, User};
use uuid::Uuid;
use webauthn_rs::prelude::{
    CreationChallengeResponse, CredentialID, PublicKeyCredential, RegisterPublicKeyCredential,
    RequestChallengeResponse, SecurityKey, SecurityKeyAuthentication, SecurityKeyRegistration,
    Url, Webauthn, WebauthnBuilder, WebauthnError,
};

/// Ceremony challenges are single use and short lived.
const CHALLENGE_TTL_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct WebauthnConfig {
    pub display_name: String,
    pub domain: String,
    pub request_origin: String,
    pub max_devices: i64,
}

impl WebauthnConfig {
    pub fn from_env() -> Self {
        Self {
            display_name: std::env::var("WEBAUTHN_DISPLAY_NAME")
                .unwrap_or_else(|_| "Stepauth".to_string()),
            domain: std::env::var("WEBAUTHN_DOMAIN")
                .unwrap_or_else(|_| "stepauth.local".to_string()),
            request_origin: std::env::var("WEBAUTHN_REQUEST_ORIGIN")
                .unwrap_or_else(|_| "https://stepauth.local".to_string()),
            max_devices: std::env::var("WEBAUTHN_MAX_DEVICES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        }
    }
}

/// Relying-party side of the WebAuthn Level 2 protocol.
///
/// Ephemeral ceremony state (`SecurityKeyRegistration`,
/// `SecurityKeyAuthentication`) is serialized into Redis keyed by user ID
/// and consumed on the finishing call, so a challenge can be answered at
/// most once.
#[derive(Clone)]
pub struct WebauthnService {
    webauthn: Arc<Webauthn>,
    cache: Cache,
    repo: RepositoryManager,
    max_devices: i64,
}

impl WebauthnService {
    pub fn new(config: WebauthnConfig, cache: Cache, repo: RepositoryManager) -> Result<Self> {
        let origin = Url::parse(&config.request_origin)
            .map_err(|e| AuthError::Internal(format!("invalid WebAuthn origin: {}", e)))?;
        let webauthn = WebauthnBuilder::new(&config.domain, &origin)
            .map_err(AuthError::Webauthn)?
            .rp_name(&config.display_name)
            .build()
            .map_err(AuthError::Webauthn)?;

        Ok(Self {
            webauthn: Arc::new(webauthn),
            cache,
            repo,
            max_devices: config.max_devices,
        })
    }

    /// Begin registration of a new device. Credentials the user already
    /// holds are excluded from the challenge.
    pub async fn begin_sign_up(&self, user: &User) -> Result<CreationChallengeResponse> {
        let existing = DeviceRepository::by_user_id(self.repo.pool(), user.id).await?;
        let exclude: Vec<CredentialID> = existing
            .into_iter()
            .map(|d| d.client_id.into())
            .collect();

        let (challenge, registration) = self.webauthn.start_securitykey_registration(
            user.id,
            &user.default_name(),
            &user.default_name(),
            Some(exclude),
            None,
            None,
        )?;

        self.cache
            .set(
                &webauthn_key(&user.id.to_string()),
                &registration,
                Some(CHALLENGE_TTL_SECS),
            )
            .await?;

        Ok(challenge)
    }

    /// Finish registration: verify the attestation and persist the device.
    /// The device-count cap is checked inside the same transaction as the
    /// insert so concurrent ceremonies cannot exceed it.
    pub async fn finish_sign_up(
        &self,
        user: &User,
        name: &str,
        response: &RegisterPublicKeyCredential,
    ) -> Result<Device> {
        let registration: SecurityKeyRegistration = self
            .cache
            .take(&webauthn_key(&user.id.to_string()))
            .await?
            .ok_or_else(|| {
                AuthError::BadRequest("no registration ceremony in progress".to_string())
            })?;

        let key = self
            .webauthn
            .finish_securitykey_registration(response, &registration)?;

        let serialized = serde_json::to_vec(&key)?;
        let aaguid = aaguid_from_credential(&serde_json::to_value(&key)?);

        let now = Utc::now();
        let device = Device {
            id: Uuid::new_v4(),
            user_id: user.id,
            client_id: key.cred_id().as_slice().to_vec(),
            public_key: serialized,
            name: name.to_string(),
            aaguid,
            sign_count: 0,
            is_disabled: false,
            created_at: now,
            updated_at: now,
        };

        let max_devices = self.max_devices;
        let user_id = user.id;

        let created = self
            .repo
            .with_atomic(move |tx| {
                Box::pin(async move {
                    let count = DeviceRepository::count_for_user(&mut **tx, user_id)
                        .await
                        .map_err(AuthError::from)?;
                    if count >= max_devices {
                        return Err(AuthError::BadRequest(format!(
                            "a maximum of {} devices may be registered",
                            max_devices
                        )));
                    }

                    let created = DeviceRepository::create(&mut **tx, &device)
                        .await
                        .map_err(AuthError::from)?;

                    let mut owner = UserRepository::get_for_update(&mut **tx, user_id)
                        .await
                        .map_err(AuthError::from)?;
                    owner.is_device_allowed = true;
                    UserRepository::update(&mut **tx, &owner)
                        .await
                        .map_err(AuthError::from)?;

                    Ok::<_, AuthError>(created)
                })
            })
            .await?;

        Ok(created)
    }

    /// Begin an assertion ceremony over the user's enabled devices.
    pub async fn begin_login(&self, user: &User) -> Result<RequestChallengeResponse> {
        let devices = DeviceRepository::by_user_id(self.repo.pool(), user.id).await?;
        let keys: Vec<SecurityKey> = devices
            .iter()
            .filter(|d| !d.is_disabled)
            .filter_map(|d| serde_json::from_slice(&d.public_key).ok())
            .collect();

        if keys.is_empty() {
            return Err(AuthError::NotFound(
                "no devices registered for user".to_string(),
            ));
        }

        let (challenge, authentication) = self.webauthn.start_securitykey_authentication(&keys)?;

        self.cache
            .set(
                &webauthn_key(&user.id.to_string()),
                &authentication,
                Some(CHALLENGE_TTL_SECS),
            )
            .await?;

        Ok(challenge)
    }

    /// Finish an assertion ceremony. The reported signature counter must
    /// strictly exceed the stored value; a regression marks the device as
    /// disabled (that write survives the failure) and rejects the attempt.
    pub async fn finish_login(&self, user: &User, response: &PublicKeyCredential) -> Result<()> {
        let authentication: SecurityKeyAuthentication = self
            .cache
            .take(&webauthn_key(&user.id.to_string()))
            .await?
            .ok_or_else(|| {
                AuthError::BadRequest("no login ceremony in progress".to_string())
            })?;

        let result = match self
            .webauthn
            .finish_securitykey_authentication(response, &authentication)
        {
            Ok(result) => result,
            // The library trips on the counter before we do when the
            // stored credential is current.
            Err(WebauthnError::CredentialPossibleCompromise) => {
                self.disable_device(user, response.raw_id.as_ref()).await?;
                return Err(AuthError::Unauthorized(
                    "device failed sign count verification".to_string(),
                ));
            }
            Err(err) => return Err(err.into()),
        };

        let cred_id = result.cred_id().as_slice().to_vec();
        let counter = result.counter();

        let device =
            DeviceRepository::by_client_id(self.repo.pool(), user.id, &cred_id).await?;

        if device.is_disabled {
            return Err(AuthError::Unauthorized(
                "device has been disabled".to_string(),
            ));
        }

        if !device.accepts_counter(counter) {
            self.disable_device(user, &cred_id).await?;
            return Err(AuthError::Unauthorized(
                "device failed sign count verification".to_string(),
            ));
        }

        let device_id = device.id;
        self.repo
            .with_atomic(move |tx| {
                Box::pin(async move {
                    let mut locked = DeviceRepository::get_for_update(&mut **tx, device_id)
                        .await
                        .map_err(AuthError::from)?;

                    if !locked.accepts_counter(counter) {
                        return Err(AuthError::Unauthorized(
                            "device failed sign count verification".to_string(),
                        ));
                    }

                    locked.sign_count = i64::from(counter);
                    if result.needs_update() {
                        if let Ok(mut key) =
                            serde_json::from_slice::<SecurityKey>(&locked.public_key)
                        {
                            key.update_credential(&result);
                            locked.public_key =
                                serde_json::to_vec(&key).map_err(AuthError::from)?;
                        }
                    }

                    DeviceRepository::update(&mut **tx, &locked)
                        .await
                        .map_err(AuthError::from)?;
                    Ok::<_, AuthError>(())
                })
            })
            .await?;

        Ok(())
    }

    /// Flag a device as a possible clone. The write deliberately runs
    /// outside the failing request's transaction so it commits even
    /// though the assertion is rejected.
    async fn disable_device(&self, user: &User, cred_id: &[u8]) -> Result<()> {
        let device = DeviceRepository::by_client_id(self.repo.pool(), user.id, cred_id).await?;

        let mut flagged = device.clone();
        flagged.is_disabled = true;
        DeviceRepository::update(self.repo.pool(), &flagged).await?;

        tracing::warn!(
            device_id = %device.id,
            user_id = %user.id,
            stored = device.sign_count,
            "sign count regression; device disabled"
        );

        Ok(())
    }
}

/// Best-effort AAGUID extraction from a serialized credential. Zeroed when
/// the authenticator did not attest (the default for security keys
/// registered without an attestation CA list).
fn aaguid_from_credential(credential: &serde_json::Value) -> Vec<u8> {
    credential
        .get("attestation")
        .and_then(|a| a.get("metadata"))
        .and_then(|m| m.as_object())
        .and_then(|m| m.values().next())
        .and_then(|v| v.get("aaguid"))
        .and_then(|v| serde_json::from_value::<Uuid>(v.clone()).ok())
        .map(|u| u.as_bytes().to_vec())
        .unwrap_or_else(|| vec![0u8; 16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_aaguid_defaults_to_zeroes() {
        assert_eq!(aaguid_from_credential(&json!({})), vec![0u8; 16]);
        assert_eq!(
            aaguid_from_credential(&json!({"attestation": {"metadata": "None"}})),
            vec![0u8; 16]
        );
    }

    #[test]
    fn test_aaguid_extracted_from_attestation_metadata() {
        let id = Uuid::new_v4();
        let value = json!({
            "attestation": {
                "metadata": {
                    "Packed": { "aaguid": id }
                }
            }
        });

        assert_eq!(aaguid_from_credential(&value), id.as_bytes().to_vec());
    }

    #[test]
    fn test_config_defaults() {
        let config = WebauthnConfig::from_env();
        assert_eq!(config.max_devices, 5);
        assert!(!config.display_name.is_empty());
    }
}
