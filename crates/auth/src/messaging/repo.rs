use crate::error::{AuthError, Result};
use std::sync::Mutex;
use stepauth_models::Message;
use tokio::sync::mpsc;

/// Default bound on the outbound message queue.
const DEFAULT_CAPACITY: usize = 256;

/// In-process queue of pending outbound messages.
///
/// Publication never blocks: a full queue surfaces as a backpressure
/// error so the caller decides whether to fail the request or carry on.
/// The queue closes when the repository is dropped, which is the signal
/// for the consumer's workers to drain and exit.
pub struct MessageRepo {
    sender: mpsc::Sender<Message>,
    receiver: Mutex<Option<mpsc::Receiver<Message>>>,
}

impl MessageRepo {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Queue a message for delivery.
    pub fn publish(&self, message: Message) -> Result<()> {
        self.sender.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => AuthError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => {
                AuthError::Internal("message queue is closed".to_string())
            }
        })
    }

    /// Hand out the receiving half of the queue. May be taken once; the
    /// consumer ranges over it until the queue closes.
    pub fn recent(&self) -> Option<mpsc::Receiver<Message>> {
        self.receiver.lock().expect("receiver mutex poisoned").take()
    }

    /// A sender handle for delivery retries that does not keep the queue
    /// open on its own.
    pub fn retry_sender(&self) -> mpsc::WeakSender<Message> {
        self.sender.downgrade()
    }
}

impl Default for MessageRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use stepauth_models::DeliveryMethod;

    fn message() -> Message {
        Message {
            delivery: DeliveryMethod::Email,
            content: "Your verification code is 123456".to_string(),
            address: "jane@example.com".to_string(),
            expires_at: Utc::now() + Duration::minutes(5),
            delivery_attempts: 0,
        }
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let repo = MessageRepo::with_capacity(4);
        repo.publish(message()).unwrap();
        repo.publish(message()).unwrap();

        let mut rx = repo.recent().expect("receiver available");
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_full_queue_is_backpressure() {
        let repo = MessageRepo::with_capacity(1);
        repo.publish(message()).unwrap();

        let err = repo.publish(message()).unwrap_err();
        assert!(matches!(err, AuthError::Backpressure));
    }

    #[tokio::test]
    async fn test_receiver_taken_once() {
        let repo = MessageRepo::with_capacity(1);
        assert!(repo.recent().is_some());
        assert!(repo.recent().is_none());
    }

    #[tokio::test]
    async fn test_queue_closes_when_repo_drops() {
        let repo = MessageRepo::with_capacity(1);
        repo.publish(message()).unwrap();
        let mut rx = repo.recent().unwrap();
        let retry = repo.retry_sender();
        drop(repo);

        // Buffered messages drain before the closed queue reports empty.
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
        assert!(retry.upgrade().is_none());
    }
}
