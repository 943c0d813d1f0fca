use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One record per issued authorized token. Tokens are invalidated through
/// expiry or revocation; `is_revoked` never reverts once set. Expired rows
/// are retained for audit.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LoginHistory {
    pub token_id: String,
    pub user_id: Uuid,
    pub is_revoked: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
