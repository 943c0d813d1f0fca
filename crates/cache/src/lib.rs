pub mod error;
pub mod redis_cache;

pub use error::{CacheError, Result};
pub use redis_cache::{
    otp_key, rate_limit_key, revocation_key, webauthn_key, Cache, CacheConfig,
};
