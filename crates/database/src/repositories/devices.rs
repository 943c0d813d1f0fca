use crate::error::{DatabaseError, Result};
use sqlx::PgExecutor;
use stepauth_models::Device;
use uuid::Uuid;

pub struct DeviceRepository;

impl DeviceRepository {
    pub async fn by_id<'e, E>(exec: E, device_id: Uuid) -> Result<Device>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = $1")
            .bind(device_id)
            .fetch_optional(exec)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Device", &device_id.to_string()))
    }

    /// Retrieve a device by the authenticator supplied credential ID.
    /// `(user_id, client_id)` is unique.
    pub async fn by_client_id<'e, E>(exec: E, user_id: Uuid, client_id: &[u8]) -> Result<Device>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Device>(
            "SELECT * FROM devices WHERE user_id = $1 AND client_id = $2",
        )
        .bind(user_id)
        .bind(client_id)
        .fetch_optional(exec)
        .await?
        .ok_or_else(|| DatabaseError::not_found("Device", &user_id.to_string()))
    }

    pub async fn by_user_id<'e, E>(exec: E, user_id: Uuid) -> Result<Vec<Device>>
    where
        E: PgExecutor<'e>,
    {
        let devices = sqlx::query_as::<_, Device>(
            "SELECT * FROM devices WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(exec)
        .await?;

        Ok(devices)
    }

    pub async fn count_for_user<'e, E>(exec: E, user_id: Uuid) -> Result<i64>
    where
        E: PgExecutor<'e>,
    {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM devices WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(exec)
            .await?;

        Ok(count.0)
    }

    pub async fn create<'e, E>(exec: E, device: &Device) -> Result<Device>
    where
        E: PgExecutor<'e>,
    {
        let created = sqlx::query_as::<_, Device>(
            r#"
            INSERT INTO devices (
                id, user_id, client_id, public_key, name, aaguid,
                sign_count, is_disabled
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(device.id)
        .bind(device.user_id)
        .bind(&device.client_id)
        .bind(&device.public_key)
        .bind(&device.name)
        .bind(&device.aaguid)
        .bind(device.sign_count)
        .bind(device.is_disabled)
        .fetch_one(exec)
        .await?;

        Ok(created)
    }

    /// Retrieve a device by ID with a row lock. Only meaningful inside a
    /// transaction.
    pub async fn get_for_update<'e, E>(exec: E, device_id: Uuid) -> Result<Device>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = $1 FOR UPDATE")
            .bind(device_id)
            .fetch_optional(exec)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Device", &device_id.to_string()))
    }

    pub async fn update<'e, E>(exec: E, device: &Device) -> Result<Device>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Device>(
            r#"
            UPDATE devices
            SET public_key = $2,
                name = $3,
                sign_count = $4,
                is_disabled = $5,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(device.id)
        .bind(&device.public_key)
        .bind(&device.name)
        .bind(device.sign_count)
        .bind(device.is_disabled)
        .fetch_optional(exec)
        .await?
        .ok_or_else(|| DatabaseError::not_found("Device", &device.id.to_string()))
    }

    pub async fn remove<'e, E>(exec: E, device_id: Uuid, user_id: Uuid) -> Result<()>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM devices WHERE id = $1 AND user_id = $2")
            .bind(device_id)
            .bind(user_id)
            .execute(exec)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Device", &device_id.to_string()));
        }

        Ok(())
    }
}
