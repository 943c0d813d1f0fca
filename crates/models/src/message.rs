use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A mechanism to deliver messages to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    Phone,
    Email,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::Phone => "phone",
            DeliveryMethod::Email => "email",
        }
    }
}

impl std::fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound message queued for delivery to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub delivery: DeliveryMethod,
    pub content: String,
    pub address: String,

    /// Latest time at which delivery may still be attempted.
    pub expires_at: DateTime<Utc>,

    /// Total delivery attempts made so far.
    pub delivery_attempts: u32,
}

impl Message {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
