use stepauth_auth::{EmailConfig, OtpConfig, PasswordConfig, SmsConfig, TokenConfig, WebauthnConfig};
use stepauth_cache::CacheConfig;
use stepauth_database::DatabaseConfig;

#[derive(Clone)]
pub struct Config {
    pub http_addr: String,
    pub consumer_workers: usize,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub token: TokenConfig,
    pub otp: OtpConfig,
    pub password: PasswordConfig,
    pub webauthn: WebauthnConfig,
    pub sms: SmsConfig,
    pub email: EmailConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            http_addr: std::env::var("API_HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            consumer_workers: std::env::var("MSGCONSUMER_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
            database: DatabaseConfig::from_env(),
            cache: CacheConfig::from_env(),
            token: TokenConfig::from_env(),
            otp: OtpConfig::from_env(),
            password: PasswordConfig::from_env(),
            webauthn: WebauthnConfig::from_env(),
            sms: SmsConfig::from_env(),
            email: EmailConfig::from_env(),
        }
    }
}
