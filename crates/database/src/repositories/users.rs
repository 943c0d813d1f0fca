use crate::error::{DatabaseError, Result};
use sqlx::PgExecutor;
use stepauth_models::{DeliveryMethod, User};
use uuid::Uuid;

pub struct UserRepository;

impl UserRepository {
    /// Retrieve a user by a whitelisted identity attribute: `id`, `email`,
    /// or `phone`.
    pub async fn by_identity<'e, E>(exec: E, attribute: &str, value: &str) -> Result<User>
    where
        E: PgExecutor<'e>,
    {
        let query = match attribute {
            "id" => "SELECT * FROM users WHERE id = $1::uuid",
            "email" => "SELECT * FROM users WHERE email = $1",
            "phone" => "SELECT * FROM users WHERE phone = $1",
            _ => {
                return Err(DatabaseError::InvalidInput(format!(
                    "{} is not a valid identity attribute",
                    attribute
                )))
            }
        };

        sqlx::query_as::<_, User>(query)
            .bind(value)
            .fetch_optional(exec)
            .await?
            .ok_or_else(|| DatabaseError::not_found("User", value))
    }

    pub async fn by_id<'e, E>(exec: E, user_id: Uuid) -> Result<User>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(exec)
            .await?
            .ok_or_else(|| DatabaseError::not_found("User", &user_id.to_string()))
    }

    /// Retrieve a user by ID with a row lock. Only meaningful inside a
    /// transaction.
    pub async fn get_for_update<'e, E>(exec: E, user_id: Uuid) -> Result<User>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(exec)
            .await?
            .ok_or_else(|| DatabaseError::not_found("User", &user_id.to_string()))
    }

    pub async fn create<'e, E>(exec: E, user: &User) -> Result<User>
    where
        E: PgExecutor<'e>,
    {
        let created = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (
                id, phone, email, password_hash, tfa_secret,
                is_phone_otp_allowed, is_email_otp_allowed,
                is_totp_allowed, is_device_allowed, is_verified
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(user.id)
        .bind(&user.phone)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.tfa_secret)
        .bind(user.is_phone_otp_allowed)
        .bind(user.is_email_otp_allowed)
        .bind(user.is_totp_allowed)
        .bind(user.is_device_allowed)
        .bind(user.is_verified)
        .fetch_one(exec)
        .await?;

        Ok(created)
    }

    /// Replace an unverified user row so the entry reads as a brand new
    /// registration: fresh ID, fresh password hash, reset factor state and
    /// timestamps. Users stay unverified until they complete OTP
    /// verification of their contact address.
    pub async fn re_create<'e, E>(exec: E, previous_id: Uuid, user: &User) -> Result<User>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET id = $2,
                phone = $3,
                email = $4,
                password_hash = $5,
                tfa_secret = '',
                is_phone_otp_allowed = FALSE,
                is_email_otp_allowed = FALSE,
                is_totp_allowed = FALSE,
                is_device_allowed = FALSE,
                created_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND is_verified = FALSE
            RETURNING *
            "#,
        )
        .bind(previous_id)
        .bind(user.id)
        .bind(&user.phone)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_optional(exec)
        .await?
        .ok_or_else(|| {
            DatabaseError::ConstraintViolation("only unverified users may be re-created".to_string())
        })
    }

    pub async fn update<'e, E>(exec: E, user: &User) -> Result<User>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET phone = $2,
                email = $3,
                password_hash = $4,
                tfa_secret = $5,
                is_phone_otp_allowed = $6,
                is_email_otp_allowed = $7,
                is_totp_allowed = $8,
                is_device_allowed = $9,
                is_verified = $10,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(user.id)
        .bind(&user.phone)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.tfa_secret)
        .bind(user.is_phone_otp_allowed)
        .bind(user.is_email_otp_allowed)
        .bind(user.is_totp_allowed)
        .bind(user.is_device_allowed)
        .bind(user.is_verified)
        .fetch_optional(exec)
        .await?
        .ok_or_else(|| DatabaseError::not_found("User", &user.id.to_string()))
    }

    /// Disable OTP delivery over a method for a user.
    pub async fn disable_otp<'e, E>(exec: E, user_id: Uuid, method: DeliveryMethod) -> Result<User>
    where
        E: PgExecutor<'e>,
    {
        let query = match method {
            DeliveryMethod::Email => {
                "UPDATE users SET is_email_otp_allowed = FALSE, updated_at = NOW() \
                 WHERE id = $1 RETURNING *"
            }
            DeliveryMethod::Phone => {
                "UPDATE users SET is_phone_otp_allowed = FALSE, updated_at = NOW() \
                 WHERE id = $1 RETURNING *"
            }
        };

        sqlx::query_as::<_, User>(query)
            .bind(user_id)
            .fetch_optional(exec)
            .await?
            .ok_or_else(|| DatabaseError::not_found("User", &user_id.to_string()))
    }

    /// Remove a phone or email from a user. The other contact must remain
    /// populated; the guard is part of the statement so the check and the
    /// write cannot race.
    pub async fn remove_delivery_method<'e, E>(
        exec: E,
        user_id: Uuid,
        method: DeliveryMethod,
    ) -> Result<User>
    where
        E: PgExecutor<'e>,
    {
        let query = match method {
            DeliveryMethod::Email => {
                "UPDATE users SET email = NULL, is_email_otp_allowed = FALSE, updated_at = NOW() \
                 WHERE id = $1 AND phone IS NOT NULL RETURNING *"
            }
            DeliveryMethod::Phone => {
                "UPDATE users SET phone = NULL, is_phone_otp_allowed = FALSE, updated_at = NOW() \
                 WHERE id = $1 AND email IS NOT NULL RETURNING *"
            }
        };

        sqlx::query_as::<_, User>(query)
            .bind(user_id)
            .fetch_optional(exec)
            .await?
            .ok_or_else(|| {
                DatabaseError::ConstraintViolation(
                    "a user must retain at least one contact address".to_string(),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_identity_attribute_rejected() {
        // The attribute whitelist is enforced before any query is issued,
        // so a closed pool is never touched.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgresql://localhost/unused")
            .unwrap();

        let err = UserRepository::by_identity(&pool, "password_hash", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidInput(_)));
    }
}
