use crate::error::{AuthError, Result};
use crate::messaging::consumer::Messenger;
use async_trait::async_trait;
use lettre::{
    message::Mailbox,
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub server_addr: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_addr: String,
    pub from_name: String,
}

impl EmailConfig {
    pub fn from_env() -> Self {
        Self {
            server_addr: std::env::var("MAIL_SERVER_ADDR").unwrap_or_default(),
            port: std::env::var("MAIL_SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(587),
            username: std::env::var("MAIL_AUTH_USERNAME").ok(),
            password: std::env::var("MAIL_AUTH_PASSWORD").ok(),
            from_addr: std::env::var("MAIL_FROM_ADDR").unwrap_or_default(),
            from_name: std::env::var("MAIL_FROM_NAME").unwrap_or_else(|_| "Stepauth".to_string()),
        }
    }
}

/// Email delivery over SMTP.
pub struct SmtpEmail {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmail {
    pub fn new(config: EmailConfig) -> Result<Self> {
        let from = format!("{} <{}>", config.from_name, config.from_addr)
            .parse::<Mailbox>()
            .map_err(|e| AuthError::Internal(format!("invalid from address: {}", e)))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.server_addr)
            .map_err(|e| AuthError::Internal(format!("failed to create SMTP transport: {}", e)))?
            .port(config.port);

        if let (Some(username), Some(password)) = (config.username, config.password) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Messenger for SmtpEmail {
    async fn send(&self, content: &str, address: &str) -> Result<()> {
        let to = address
            .parse::<Mailbox>()
            .map_err(|e| AuthError::Internal(format!("invalid to address: {}", e)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject("Your verification code")
            .body(content.to_string())
            .map_err(|e| AuthError::Internal(format!("failed to build email: {}", e)))?;

        self.mailer
            .send(message)
            .await
            .map_err(|e| AuthError::Internal(format!("failed to send email: {}", e)))?;

        tracing::debug!(to = %address, "email accepted by relay");
        Ok(())
    }
}
