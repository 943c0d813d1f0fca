use crate::error::{AuthError, Result};
use crate::messaging::consumer::Messenger;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub sms_sender: String,
}

impl SmsConfig {
    pub fn from_env() -> Self {
        Self {
            account_sid: std::env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            auth_token: std::env::var("TWILIO_TOKEN").unwrap_or_default(),
            sms_sender: std::env::var("TWILIO_SMS_SENDER").unwrap_or_default(),
        }
    }
}

/// SMS delivery through the Twilio REST API.
pub struct TwilioSms {
    client: reqwest::Client,
    config: SmsConfig,
}

impl TwilioSms {
    pub fn new(config: SmsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Messenger for TwilioSms {
    async fn send(&self, content: &str, address: &str) -> Result<()> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.config.account_sid
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", address),
                ("From", self.config.sms_sender.as_str()),
                ("Body", content),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Internal(format!("failed to reach SMS gateway: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Internal(format!(
                "SMS gateway rejected message: {} {}",
                status, body
            )));
        }

        tracing::debug!(to = %address, "SMS accepted by gateway");
        Ok(())
    }
}
