use crate::error::Result;
use crate::messaging::repo::MessageRepo;
use chrono::{Duration, Utc};
use std::sync::Arc;
use stepauth_models::{DeliveryMethod, Message};

/// Messages are abandoned if they cannot be delivered within this window;
/// it matches the OTP validity so a late code is never useful.
const MESSAGE_TTL_SECS: i64 = 300;

/// Assembles outbound payloads and places them on the message queue.
#[derive(Clone)]
pub struct MessagePublisher {
    repo: Arc<MessageRepo>,
}

impl MessagePublisher {
    pub fn new(repo: Arc<MessageRepo>) -> Self {
        Self { repo }
    }

    /// Queue an arbitrary message for a user.
    pub fn send(&self, content: String, address: String, method: DeliveryMethod) -> Result<()> {
        self.repo.publish(Message {
            delivery: method,
            content,
            address,
            expires_at: Utc::now() + Duration::seconds(MESSAGE_TTL_SECS),
            delivery_attempts: 0,
        })
    }

    /// Queue an OTP code for delivery.
    pub fn send_otp(&self, code: &str, address: &str, method: DeliveryMethod) -> Result<()> {
        let content = format!(
            "Your verification code is {}. It expires in 5 minutes.",
            code
        );
        self.send(content, address.to_string(), method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_otp_payload_assembly() {
        let repo = Arc::new(MessageRepo::with_capacity(4));
        let publisher = MessagePublisher::new(repo.clone());

        publisher
            .send_otp("123456", "+15555551234", DeliveryMethod::Phone)
            .unwrap();

        let mut rx = repo.recent().unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.delivery, DeliveryMethod::Phone);
        assert_eq!(msg.address, "+15555551234");
        assert!(msg.content.contains("123456"));
        assert_eq!(msg.delivery_attempts, 0);
        assert!(msg.expires_at > Utc::now());
    }
}
