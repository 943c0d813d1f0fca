use crate::error::{AuthError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use rand::{rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha512};
use stepauth_models::User;
use subtle::ConstantTimeEq;
use totp_lite::{totp_custom, Sha1};

/// Validity window for randomly generated OTP codes.
pub const OTP_VALIDITY_SECS: i64 = 300;

const TOTP_DIGITS: u32 = 6;
const TOTP_STEP: u64 = 30;
const TOTP_SECRET_BYTES: usize = 20;

#[derive(Debug, Clone)]
pub struct OtpConfig {
    pub code_length: usize,
    pub issuer: String,

    /// Base64 encoded 256-bit key protecting TOTP secrets at rest.
    pub secret_key: String,

    /// Version prefix written with every ciphertext so the key can rotate.
    pub secret_version: u32,
}

impl OtpConfig {
    pub fn from_env() -> Self {
        Self {
            code_length: std::env::var("OTP_CODE_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(6),
            issuer: std::env::var("OTP_ISSUER").unwrap_or_else(|_| "stepauth".to_string()),
            secret_key: std::env::var("OTP_SECRET_KEY").unwrap_or_default(),
            secret_version: std::env::var("OTP_SECRET_VERSION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
        }
    }
}

/// Generates and validates numeric OTP codes and RFC 6238 TOTP codes.
///
/// Randomly generated codes are self-describing: the returned hash embeds
/// its own expiry (`<hex sha512(code:expiry)>:<expiry_unix>`) so validation
/// needs no state beyond "now". Single use is enforced separately, through
/// the issued-code markers kept by the token service.
#[derive(Clone)]
pub struct OtpService {
    config: OtpConfig,
}

impl OtpService {
    pub fn new(config: OtpConfig) -> Self {
        Self { config }
    }

    /// Create a random OTP code. Returns the plaintext code and its hash.
    pub fn otp_code(&self) -> Result<(String, String)> {
        let mut rng = OsRng;
        let code: String = (0..self.config.code_length)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();

        let expires_at = Utc::now().timestamp() + OTP_VALIDITY_SECS;
        let hash = hash_with_expiry(&code, expires_at);

        Ok((code, hash))
    }

    /// Check an OTP code against a hash produced by `otp_code`.
    pub fn validate_otp(&self, code: &str, hash: &str) -> Result<()> {
        let (digest, expires_at) = split_hash(hash)?;

        if Utc::now().timestamp() >= expires_at {
            return Err(AuthError::InvalidCode("code has expired".to_string()));
        }

        let expected = hash_with_expiry(code, expires_at);
        let (expected_digest, _) = split_hash(&expected)?;

        if expected_digest.as_bytes().ct_eq(digest.as_bytes()).into() {
            Ok(())
        } else {
            Err(AuthError::InvalidCode("incorrect code provided".to_string()))
        }
    }

    /// Return the plaintext TOTP secret for a user, generating and
    /// encrypting a fresh one when none is configured. The encrypted form
    /// is written back to `user.tfa_secret`.
    pub fn totp_secret(&self, user: &mut User) -> Result<String> {
        if !user.tfa_secret.is_empty() {
            return self.decrypt_secret(&user.tfa_secret);
        }

        let mut raw = [0u8; TOTP_SECRET_BYTES];
        OsRng.fill_bytes(&mut raw);
        let secret = base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &raw);

        user.tfa_secret = self.encrypt_secret(&secret)?;
        Ok(secret)
    }

    /// Provisioning URI for authenticator apps.
    pub fn totp_qr_string(&self, user: &User, secret: &str) -> String {
        format!(
            "otpauth://totp/{}:{}?secret={}&issuer={}&algorithm=SHA1&digits={}&period={}",
            urlencoding::encode(&self.config.issuer),
            urlencoding::encode(&user.default_name()),
            secret,
            urlencoding::encode(&self.config.issuer),
            TOTP_DIGITS,
            TOTP_STEP,
        )
    }

    /// Check a user supplied TOTP code, allowing one step of clock drift
    /// in either direction.
    pub fn validate_totp(&self, user: &User, code: &str) -> Result<()> {
        if user.tfa_secret.is_empty() {
            return Err(AuthError::BadRequest(
                "user has no TOTP secret configured".to_string(),
            ));
        }

        let secret = self.decrypt_secret(&user.tfa_secret)?;
        let secret_bytes = base32::decode(base32::Alphabet::Rfc4648 { padding: false }, &secret)
            .ok_or_else(|| AuthError::Internal("stored TOTP secret is malformed".to_string()))?;

        let now = Utc::now().timestamp() as u64;
        let mut matched = false;
        for offset in [-1i64, 0, 1] {
            let step_time = now.saturating_add_signed(offset * TOTP_STEP as i64);
            let expected = totp_custom::<Sha1>(TOTP_STEP, TOTP_DIGITS, &secret_bytes, step_time);
            if expected.as_bytes().ct_eq(code.as_bytes()).into() {
                matched = true;
            }
        }

        if matched {
            Ok(())
        } else {
            Err(AuthError::InvalidCode("incorrect code provided".to_string()))
        }
    }

    /// Encrypt a TOTP secret for storage.
    ///
    /// Format: `v<version>:<base64(nonce || ciphertext)>` with a 12 byte
    /// nonce; the tag is appended by AES-GCM.
    fn encrypt_secret(&self, secret: &str) -> Result<String> {
        let key = self.encryption_key()?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| AuthError::Internal(format!("invalid encryption key: {}", e)))?;

        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, secret.as_bytes())
            .map_err(|e| AuthError::Internal(format!("encryption failed: {}", e)))?;

        let mut combined = Vec::with_capacity(12 + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(format!(
            "v{}:{}",
            self.config.secret_version,
            STANDARD.encode(&combined)
        ))
    }

    fn decrypt_secret(&self, stored: &str) -> Result<String> {
        let (version, payload) = stored
            .split_once(':')
            .ok_or_else(|| AuthError::Internal("malformed TOTP secret".to_string()))?;

        if version != format!("v{}", self.config.secret_version) {
            return Err(AuthError::Internal(format!(
                "TOTP secret encrypted with unsupported key version {}",
                version
            )));
        }

        let combined = STANDARD
            .decode(payload)
            .map_err(|e| AuthError::Internal(format!("malformed TOTP secret: {}", e)))?;

        if combined.len() < 12 {
            return Err(AuthError::Internal("malformed TOTP secret".to_string()));
        }

        let key = self.encryption_key()?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| AuthError::Internal(format!("invalid encryption key: {}", e)))?;

        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| AuthError::Internal(format!("decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| AuthError::Internal(format!("invalid secret encoding: {}", e)))
    }

    fn encryption_key(&self) -> Result<[u8; 32]> {
        let bytes = STANDARD
            .decode(&self.config.secret_key)
            .map_err(|e| AuthError::Internal(format!("invalid encryption key format: {}", e)))?;

        bytes.try_into().map_err(|_| {
            AuthError::Internal("encryption key must be 32 bytes (256 bits)".to_string())
        })
    }
}

/// `<hex sha512(value:expiry)>:<expiry_unix>`
pub(crate) fn hash_with_expiry(value: &str, expires_at: i64) -> String {
    let mut hasher = Sha512::new();
    hasher.update(format!("{}:{}", value, expires_at).as_bytes());
    format!("{}:{}", hex::encode(hasher.finalize()), expires_at)
}

pub(crate) fn split_hash(hash: &str) -> Result<(&str, i64)> {
    let (digest, expiry) = hash
        .rsplit_once(':')
        .ok_or_else(|| AuthError::InvalidCode("malformed code hash".to_string()))?;

    let expires_at = expiry
        .parse::<i64>()
        .map_err(|_| AuthError::InvalidCode("malformed code hash".to_string()))?;

    Ok((digest, expires_at))
}

#[cfg(test)]
mod tests {
    use super::*;

    // 32 zero bytes, base64 encoded.
    const TEST_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

    fn service() -> OtpService {
        OtpService::new(OtpConfig {
            code_length: 6,
            issuer: "stepauth.local".to_string(),
            secret_key: TEST_KEY.to_string(),
            secret_version: 1,
        })
    }

    fn user() -> User {
        User {
            id: uuid::Uuid::new_v4(),
            phone: None,
            email: Some("jane@example.com".to_string()),
            password_hash: String::new(),
            tfa_secret: String::new(),
            is_phone_otp_allowed: false,
            is_email_otp_allowed: true,
            is_totp_allowed: false,
            is_device_allowed: false,
            is_verified: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_otp_code_round_trip() {
        let svc = service();
        let (code, hash) = svc.otp_code().unwrap();

        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert!(svc.validate_otp(&code, &hash).is_ok());
    }

    #[test]
    fn test_wrong_code_rejected() {
        let svc = service();
        let (code, hash) = svc.otp_code().unwrap();
        let wrong = if code == "000000" { "000001" } else { "000000" };

        assert!(matches!(
            svc.validate_otp(wrong, &hash),
            Err(AuthError::InvalidCode(_))
        ));
    }

    #[test]
    fn test_expired_code_rejected() {
        let svc = service();
        let expired = hash_with_expiry("123456", Utc::now().timestamp() - 1);

        assert!(matches!(
            svc.validate_otp("123456", &expired),
            Err(AuthError::InvalidCode(_))
        ));
    }

    #[test]
    fn test_tampered_expiry_rejected() {
        let svc = service();
        let (code, hash) = svc.otp_code().unwrap();

        // Push the embedded expiry forward without recomputing the digest.
        let (digest, expiry) = split_hash(&hash).unwrap();
        let tampered = format!("{}:{}", digest, expiry + 3600);

        assert!(svc.validate_otp(&code, &tampered).is_err());
    }

    #[test]
    fn test_totp_secret_round_trip() {
        let svc = service();
        let mut u = user();

        let secret = svc.totp_secret(&mut u).unwrap();
        assert!(u.tfa_secret.starts_with("v1:"));

        // A second call decrypts the stored secret rather than rotating it.
        let again = svc.totp_secret(&mut u).unwrap();
        assert_eq!(secret, again);
    }

    #[test]
    fn test_unsupported_key_version_rejected() {
        let svc = service();
        let mut u = user();
        svc.totp_secret(&mut u).unwrap();

        let rotated = OtpService::new(OtpConfig {
            code_length: 6,
            issuer: "stepauth.local".to_string(),
            secret_key: TEST_KEY.to_string(),
            secret_version: 2,
        });
        assert!(rotated.validate_totp(&u, "000000").is_err());
    }

    #[test]
    fn test_totp_validation_accepts_current_code() {
        let svc = service();
        let mut u = user();
        let secret = svc.totp_secret(&mut u).unwrap();

        let secret_bytes =
            base32::decode(base32::Alphabet::Rfc4648 { padding: false }, &secret).unwrap();
        let code = totp_custom::<Sha1>(
            TOTP_STEP,
            TOTP_DIGITS,
            &secret_bytes,
            Utc::now().timestamp() as u64,
        );

        assert!(svc.validate_totp(&u, &code).is_ok());
    }

    #[test]
    fn test_qr_string_format() {
        let svc = service();
        let u = user();
        let uri = svc.totp_qr_string(&u, "JBSWY3DPEHPK3PXP");

        assert!(uri.starts_with("otpauth://totp/stepauth.local:"));
        assert!(uri.contains("secret=JBSWY3DPEHPK3PXP"));
        assert!(uri.contains("issuer=stepauth.local"));
        assert!(uri.contains("algorithm=SHA1"));
    }
}
