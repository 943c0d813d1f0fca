use crate::error::Result;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub url: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_CONN_STRING").unwrap_or_else(|_| Self::default().url),
        }
    }
}

#[derive(Clone)]
pub struct Cache {
    manager: ConnectionManager,
}

impl Cache {
    pub async fn new(config: CacheConfig) -> Result<Self> {
        let client = Client::open(config.url)?;
        let manager = ConnectionManager::new(client).await?;

        Ok(Self { manager })
    }

    /// Set a value with an optional TTL in seconds.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: Option<u64>,
    ) -> Result<()> {
        let serialized = serde_json::to_string(value)?;
        let mut conn = self.manager.clone();

        if let Some(ttl) = ttl_seconds {
            conn.set_ex::<_, _, ()>(key, serialized, ttl).await?;
        } else {
            conn.set::<_, _, ()>(key, serialized).await?;
        }

        Ok(())
    }

    /// Get a value from the cache.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;

        match value {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    /// Atomically get and delete a value. Used for single-use entries such
    /// as ceremony challenges and issued OTP markers.
    pub async fn take<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get_del(key).await?;

        match value {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    /// Delete a key.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    /// Check if a key exists.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    /// Increment a fixed-window counter. The TTL is applied only when the
    /// counter is created so the window does not slide on later hits.
    pub async fn incr_with_ttl(&self, key: &str, ttl_seconds: u64) -> Result<i64> {
        let mut conn = self.manager.clone();
        let value: i64 = conn.incr(key, 1).await?;
        if value == 1 {
            conn.expire::<_, ()>(key, ttl_seconds as i64).await?;
        }
        Ok(value)
    }

    /// Remaining TTL of a key in seconds.
    pub async fn ttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.manager.clone();
        let ttl: i64 = conn.ttl(key).await?;
        Ok(ttl)
    }

    /// Ping Redis to check the connection.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

// Key helpers owning the Redis namespaces.

pub fn revocation_key(token_id: &str) -> String {
    format!("revoked:{}", token_id)
}

pub fn webauthn_key(user_id: &str) -> String {
    format!("webauthn:{}", user_id)
}

pub fn otp_key(user_id: &str, method: &str) -> String {
    format!("otp:{}:{}", user_id, method)
}

pub fn rate_limit_key(route: &str, key: &str) -> String {
    format!("ratelimit:{}:{}", route, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_namespaces() {
        assert_eq!(revocation_key("abc"), "revoked:abc");
        assert_eq!(webauthn_key("u1"), "webauthn:u1");
        assert_eq!(otp_key("u1", "email"), "otp:u1:email");
        assert_eq!(rate_limit_key("login", "1.2.3.4"), "ratelimit:login:1.2.3.4");
    }

    #[tokio::test]
    #[ignore] // Only run with Redis available
    async fn test_set_get_take() {
        let cache = Cache::new(CacheConfig::from_env()).await.unwrap();

        cache.set("stepauth_test_key", &"value", Some(60)).await.unwrap();
        let value: Option<String> = cache.get("stepauth_test_key").await.unwrap();
        assert_eq!(value, Some("value".to_string()));

        let taken: Option<String> = cache.take("stepauth_test_key").await.unwrap();
        assert_eq!(taken, Some("value".to_string()));

        let gone: Option<String> = cache.take("stepauth_test_key").await.unwrap();
        assert_eq!(gone, None);
    }
}
