use crate::error::{DatabaseError, Result};
use sqlx::PgExecutor;
use stepauth_models::LoginHistory;
use uuid::Uuid;

pub struct LoginHistoryRepository;

impl LoginHistoryRepository {
    /// Recent login records for a user, newest first.
    pub async fn by_user_id<'e, E>(
        exec: E,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LoginHistory>>
    where
        E: PgExecutor<'e>,
    {
        let records = sqlx::query_as::<_, LoginHistory>(
            r#"
            SELECT * FROM login_history
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(exec)
        .await?;

        Ok(records)
    }

    pub async fn create<'e, E>(exec: E, login: &LoginHistory) -> Result<LoginHistory>
    where
        E: PgExecutor<'e>,
    {
        let created = sqlx::query_as::<_, LoginHistory>(
            r#"
            INSERT INTO login_history (token_id, user_id, is_revoked, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&login.token_id)
        .bind(login.user_id)
        .bind(login.is_revoked)
        .bind(login.expires_at)
        .fetch_one(exec)
        .await?;

        Ok(created)
    }

    /// Retrieve a record by token ID with a row lock. Only meaningful
    /// inside a transaction.
    pub async fn get_for_update<'e, E>(exec: E, token_id: &str) -> Result<LoginHistory>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, LoginHistory>(
            "SELECT * FROM login_history WHERE token_id = $1 FOR UPDATE",
        )
        .bind(token_id)
        .fetch_optional(exec)
        .await?
        .ok_or_else(|| DatabaseError::not_found("LoginHistory", token_id))
    }

    /// Persist revocation state. `is_revoked` never reverts to false once
    /// set.
    pub async fn update<'e, E>(exec: E, login: &LoginHistory) -> Result<LoginHistory>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, LoginHistory>(
            r#"
            UPDATE login_history
            SET is_revoked = is_revoked OR $2,
                updated_at = NOW()
            WHERE token_id = $1
            RETURNING *
            "#,
        )
        .bind(&login.token_id)
        .bind(login.is_revoked)
        .fetch_optional(exec)
        .await?
        .ok_or_else(|| DatabaseError::not_found("LoginHistory", &login.token_id))
    }
}
