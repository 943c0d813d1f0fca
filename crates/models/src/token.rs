use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::DeliveryMethod;

/// State of a bearer token. A token may represent an intermediary state
/// prior to authorization, for example while a TOTP code is still required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    /// Identity proven, second factor outstanding. Usable only to complete
    /// the second step of signup or login.
    PreAuthorized,
    /// Fully authenticated; usable for all protected endpoints.
    Authorized,
}

/// Options a user may exercise to complete two-factor authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TfaOption {
    #[serde(rename = "otp_email")]
    OtpEmail,
    #[serde(rename = "otp_phone")]
    OtpPhone,
    #[serde(rename = "totp")]
    Totp,
    #[serde(rename = "webauthn")]
    Webauthn,
}

/// JWT claims proving user authentication.
///
/// The plaintext client ID, OTP code, and refresh key ride on the struct
/// for out-of-band delivery (cookie, SMS/email, response body) but are
/// never serialized into the signed token body; only their hashes are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub jti: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,

    /// SHA-512 hex digest of the client ID delivered in a cookie. The
    /// token is only valid when presented together with the matching
    /// plaintext.
    #[serde(rename = "client_id")]
    pub client_id_hash: String,

    #[serde(skip)]
    pub client_id: String,

    pub user_id: Uuid,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,

    #[serde(rename = "phone_number", default, skip_serializing_if = "String::is_empty")]
    pub phone: String,

    pub state: TokenState,

    /// Hash of a randomly generated OTP code, formatted as
    /// `<hex sha512(code:expiry)>:<expiry_unix>`. Present only on tokens
    /// minted for an OTP verification step.
    #[serde(rename = "code", default, skip_serializing_if = "Option::is_none")]
    pub code_hash: Option<String>,

    #[serde(skip)]
    pub code: Option<String>,

    /// Delivery channel the embedded OTP code was issued for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp_method: Option<DeliveryMethod>,

    /// Delivery address the embedded OTP code was sent to. Differs from
    /// the identity claims only while verifying a new contact address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp_address: Option<String>,

    /// Hash of the refresh key, bound to the refresh window rather than
    /// the access token expiry.
    #[serde(rename = "refresh", default, skip_serializing_if = "String::is_empty")]
    pub refresh_hash: String,

    #[serde(skip)]
    pub refresh_key: Option<String>,

    pub tfa_options: Vec<TfaOption>,
}

impl Token {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_else(Utc::now)
    }

    /// Seconds until expiry; zero when already expired.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.exp - now.timestamp()).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> Token {
        Token {
            jti: "token-id".to_string(),
            iss: "stepauth".to_string(),
            aud: "stepauth".to_string(),
            iat: 1_700_000_000,
            exp: 1_700_001_200,
            client_id_hash: "hash".to_string(),
            client_id: "plaintext-client-id".to_string(),
            user_id: Uuid::new_v4(),
            email: "jane@example.com".to_string(),
            phone: String::new(),
            state: TokenState::PreAuthorized,
            code_hash: Some("abc:123".to_string()),
            code: Some("123456".to_string()),
            otp_method: Some(DeliveryMethod::Email),
            otp_address: Some("jane@example.com".to_string()),
            refresh_hash: "def:456".to_string(),
            refresh_key: Some("refresh-plaintext".to_string()),
            tfa_options: vec![TfaOption::OtpEmail],
        }
    }

    #[test]
    fn test_plaintext_never_serialized() {
        let serialized = serde_json::to_string(&token()).unwrap();
        assert!(!serialized.contains("plaintext-client-id"));
        assert!(!serialized.contains("123456"));
        assert!(!serialized.contains("refresh-plaintext"));
        assert!(serialized.contains("\"client_id\":\"hash\""));
        assert!(serialized.contains("\"code\":\"abc:123\""));
    }

    #[test]
    fn test_state_wire_format() {
        assert_eq!(
            serde_json::to_string(&TokenState::PreAuthorized).unwrap(),
            "\"pre_authorized\""
        );
        assert_eq!(
            serde_json::to_string(&TfaOption::Webauthn).unwrap(),
            "\"webauthn\""
        );
    }

    #[test]
    fn test_remaining_secs_clamps_at_zero() {
        let t = token();
        let before = Utc.timestamp_opt(1_700_000_600, 0).unwrap();
        let after = Utc.timestamp_opt(1_700_002_000, 0).unwrap();
        assert_eq!(t.remaining_secs(before), 600);
        assert_eq!(t.remaining_secs(after), 0);
    }
}
