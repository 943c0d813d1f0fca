use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A WebAuthn credential registered to a user, such as a FIDO U2F key or a
/// platform fingerprint sensor.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Device {
    pub id: Uuid,
    pub user_id: Uuid,

    /// Credential ID generated by the client authenticator during
    /// registration. Unique per user, not globally.
    pub client_id: Vec<u8>,

    /// Serialized credential (COSE public key and verification metadata)
    /// used to verify assertion signatures.
    #[serde(skip_serializing)]
    pub public_key: Vec<u8>,

    /// Human readable label supplied at registration time.
    pub name: String,

    /// Authenticator attestation GUID. All zeroes when the authenticator
    /// did not attest its make and model.
    pub aaguid: Vec<u8>,

    /// Stored signature counter. An assertion reporting a counter at or
    /// below this value indicates a cloned or malfunctioning device.
    pub sign_count: i64,

    /// Set when a clone was detected; disabled devices are excluded from
    /// login ceremonies.
    pub is_disabled: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// Whether a reported authenticator counter is acceptable. Counters
    /// must strictly increase on every assertion.
    pub fn accepts_counter(&self, reported: u32) -> bool {
        i64::from(reported) > self.sign_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_must_strictly_increase() {
        let device = Device {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            client_id: vec![1, 2, 3],
            public_key: Vec::new(),
            name: "yubikey".to_string(),
            aaguid: vec![0; 16],
            sign_count: 5,
            is_disabled: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(device.accepts_counter(6));
        assert!(!device.accepts_counter(5));
        assert!(!device.accepts_counter(4));
    }
}
