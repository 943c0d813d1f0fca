use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::message::DeliveryMethod;
use crate::token::TfaOption;

/// A user registered with the service.
///
/// At least one of `email` or `phone` is always populated. `is_verified`
/// flips to true exactly once, when the user proves ownership of an email
/// address or phone number through OTP verification after signup.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub phone: Option<String>,
    pub email: Option<String>,

    /// Argon2id hash of the user supplied password.
    #[serde(skip_serializing)]
    pub password_hash: String,

    /// Encrypted TOTP secret, prefixed with the encryption key version.
    /// Empty until the user requests TOTP enrollment.
    #[serde(skip_serializing)]
    pub tfa_secret: String,

    pub is_phone_otp_allowed: bool,
    pub is_email_otp_allowed: bool,
    pub is_totp_allowed: bool,
    pub is_device_allowed: bool,
    pub is_verified: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// The default channel for OTP delivery. Email is preferred when both
    /// contacts are present.
    pub fn default_otp_delivery(&self) -> DeliveryMethod {
        if self.email.is_some() {
            DeliveryMethod::Email
        } else {
            DeliveryMethod::Phone
        }
    }

    /// Whether an OTP code should be dispatched immediately as a second
    /// factor. Users holding a stronger factor (TOTP or a device) must ask
    /// for a code explicitly.
    pub fn can_send_default_otp(&self) -> bool {
        if self.is_device_allowed || self.is_totp_allowed {
            return false;
        }

        self.is_phone_otp_allowed || self.is_email_otp_allowed
    }

    /// Display name for a user: email when present, phone otherwise.
    pub fn default_name(&self) -> String {
        self.email
            .clone()
            .or_else(|| self.phone.clone())
            .unwrap_or_default()
    }

    /// The second-factor options currently enabled for this user.
    pub fn tfa_options(&self) -> Vec<TfaOption> {
        let mut options = Vec::new();
        if self.is_email_otp_allowed {
            options.push(TfaOption::OtpEmail);
        }
        if self.is_phone_otp_allowed {
            options.push(TfaOption::OtpPhone);
        }
        if self.is_totp_allowed {
            options.push(TfaOption::Totp);
        }
        if self.is_device_allowed {
            options.push(TfaOption::Webauthn);
        }
        options
    }

    /// The contact address for a delivery method, if configured.
    pub fn address(&self, method: DeliveryMethod) -> Option<&str> {
        match method {
            DeliveryMethod::Email => self.email.as_deref(),
            DeliveryMethod::Phone => self.phone.as_deref(),
        }
    }

    /// Count of enabled second factors.
    pub fn enabled_factor_count(&self) -> usize {
        [
            self.is_phone_otp_allowed,
            self.is_email_otp_allowed,
            self.is_totp_allowed,
            self.is_device_allowed,
        ]
        .iter()
        .filter(|enabled| **enabled)
        .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
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
    fn test_email_preferred_for_default_delivery() {
        let mut u = user();
        u.phone = Some("+15555551234".to_string());
        assert_eq!(u.default_otp_delivery(), DeliveryMethod::Email);

        u.email = None;
        assert_eq!(u.default_otp_delivery(), DeliveryMethod::Phone);
    }

    #[test]
    fn test_default_otp_suppressed_by_stronger_factors() {
        let mut u = user();
        assert!(u.can_send_default_otp());

        u.is_totp_allowed = true;
        assert!(!u.can_send_default_otp());

        u.is_totp_allowed = false;
        u.is_device_allowed = true;
        assert!(!u.can_send_default_otp());
    }

    #[test]
    fn test_no_default_otp_without_otp_channel() {
        let mut u = user();
        u.is_email_otp_allowed = false;
        assert!(!u.can_send_default_otp());
    }

    #[test]
    fn test_tfa_options_reflect_flags() {
        let mut u = user();
        u.is_totp_allowed = true;
        assert_eq!(u.tfa_options(), vec![TfaOption::OtpEmail, TfaOption::Totp]);
    }
}
