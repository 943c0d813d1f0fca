use crate::error::Result;
use crate::messaging::repo::MessageRepo;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use stepauth_models::{DeliveryMethod, Message};
use tokio::sync::{mpsc, Mutex};

const DEFAULT_WORKERS: usize = 4;
const MAX_DELIVERY_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_SECS: u64 = 1;
const BACKOFF_CAP_SECS: u64 = 60;

/// A delivery backend for one transport (SMS or email).
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, content: &str, address: &str) -> Result<()>;
}

/// Worker pool draining the message queue to the SMS and email backends.
///
/// Failed deliveries are retried with exponential backoff while attempts
/// remain and the message has not expired; exhausted messages are logged
/// and dropped. Workers exit when the queue closes, and `run` returns
/// once every worker has finished. Delivery errors never propagate to the
/// flows that published the message.
pub struct MessageConsumer {
    receiver: mpsc::Receiver<Message>,
    retry: mpsc::WeakSender<Message>,
    sms: Arc<dyn Messenger>,
    email: Arc<dyn Messenger>,
    workers: usize,
}

impl MessageConsumer {
    pub fn new(
        repo: &MessageRepo,
        sms: Arc<dyn Messenger>,
        email: Arc<dyn Messenger>,
    ) -> Result<Self> {
        let receiver = repo.recent().ok_or_else(|| {
            crate::error::AuthError::Internal("message queue already consumed".to_string())
        })?;

        Ok(Self {
            receiver,
            retry: repo.retry_sender(),
            sms,
            email,
            workers: DEFAULT_WORKERS,
        })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Drain the queue until it closes.
    pub async fn run(self) {
        let receiver = Arc::new(Mutex::new(self.receiver));
        let mut handles = Vec::with_capacity(self.workers);

        for worker in 0..self.workers {
            let receiver = receiver.clone();
            let retry = self.retry.clone();
            let sms = self.sms.clone();
            let email = self.email.clone();

            handles.push(tokio::spawn(async move {
                worker_loop(worker, receiver, retry, sms, email).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        tracing::info!("message consumer stopped");
    }
}

async fn worker_loop(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Message>>>,
    retry: mpsc::WeakSender<Message>,
    sms: Arc<dyn Messenger>,
    email: Arc<dyn Messenger>,
) {
    loop {
        let message = { receiver.lock().await.recv().await };
        let Some(mut message) = message else {
            tracing::debug!(worker, "message queue closed; worker exiting");
            break;
        };

        let backend: &Arc<dyn Messenger> = match message.delivery {
            DeliveryMethod::Phone => &sms,
            DeliveryMethod::Email => &email,
        };

        match backend.send(&message.content, &message.address).await {
            Ok(()) => {
                tracing::debug!(worker, address = %message.address, "message delivered");
            }
            Err(err) => {
                message.delivery_attempts += 1;

                if message.is_expired(Utc::now()) {
                    tracing::warn!(
                        worker,
                        address = %message.address,
                        reason = "expired",
                        "dropping message"
                    );
                    continue;
                }

                if message.delivery_attempts >= MAX_DELIVERY_ATTEMPTS {
                    tracing::warn!(
                        worker,
                        address = %message.address,
                        error = %err,
                        reason = "backend_error",
                        "dropping message"
                    );
                    continue;
                }

                tokio::time::sleep(backoff(message.delivery_attempts)).await;

                if message.is_expired(Utc::now()) {
                    tracing::warn!(
                        worker,
                        address = %message.address,
                        reason = "expired",
                        "dropping message"
                    );
                    continue;
                }

                match retry.upgrade() {
                    Some(sender) => {
                        if sender.try_send(message).is_err() {
                            tracing::warn!(worker, reason = "backend_error", "dropping message");
                        }
                    }
                    None => {
                        tracing::debug!(worker, "queue closed during backoff; dropping retry");
                    }
                }
            }
        }
    }
}

/// 1s, 2s, 4s, ... capped at 60s.
fn backoff(attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(16);
    let secs = (BACKOFF_BASE_SECS << exp).min(BACKOFF_CAP_SECS);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        fail_first: usize,
        attempts: AtomicUsize,
        delivered: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Messenger for Recorder {
        async fn send(&self, _content: &str, address: &str) -> Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(crate::error::AuthError::Internal("gateway down".to_string()));
            }
            self.delivered.lock().unwrap().push(address.to_string());
            Ok(())
        }
    }

    fn message(method: DeliveryMethod) -> Message {
        Message {
            delivery: method,
            content: "Your verification code is 123456".to_string(),
            address: "jane@example.com".to_string(),
            expires_at: Utc::now() + ChronoDuration::minutes(5),
            delivery_attempts: 0,
        }
    }

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(3), Duration::from_secs(4));
        assert_eq!(backoff(7), Duration::from_secs(60));
        assert_eq!(backoff(30), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_messages_delivered_and_consumer_stops_on_close() {
        let repo = MessageRepo::with_capacity(8);
        let recorder = Arc::new(Recorder::default());

        repo.publish(message(DeliveryMethod::Email)).unwrap();
        repo.publish(message(DeliveryMethod::Email)).unwrap();

        let consumer = MessageConsumer::new(
            &repo,
            recorder.clone() as Arc<dyn Messenger>,
            recorder.clone() as Arc<dyn Messenger>,
        )
        .unwrap()
        .with_workers(2);

        drop(repo);
        consumer.run().await;

        assert_eq!(recorder.delivered.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delivery_retried_with_backoff() {
        let repo = MessageRepo::with_capacity(8);
        let recorder = Arc::new(Recorder {
            fail_first: 1,
            ..Default::default()
        });

        let consumer = MessageConsumer::new(
            &repo,
            recorder.clone() as Arc<dyn Messenger>,
            recorder.clone() as Arc<dyn Messenger>,
        )
        .unwrap()
        .with_workers(1);

        let handle = tokio::spawn(consumer.run());
        repo.publish(message(DeliveryMethod::Phone)).unwrap();

        while recorder.delivered.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(repo);
        handle.await.unwrap();

        assert_eq!(recorder.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_message_dropped() {
        let repo = MessageRepo::with_capacity(8);
        let recorder = Arc::new(Recorder {
            fail_first: usize::MAX,
            ..Default::default()
        });

        let consumer = MessageConsumer::new(
            &repo,
            recorder.clone() as Arc<dyn Messenger>,
            recorder.clone() as Arc<dyn Messenger>,
        )
        .unwrap()
        .with_workers(1);

        let handle = tokio::spawn(consumer.run());
        repo.publish(message(DeliveryMethod::Email)).unwrap();

        while recorder.attempts.load(Ordering::SeqCst) < MAX_DELIVERY_ATTEMPTS as usize {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(repo);
        handle.await.unwrap();

        assert!(recorder.delivered.lock().unwrap().is_empty());
        assert_eq!(
            recorder.attempts.load(Ordering::SeqCst),
            MAX_DELIVERY_ATTEMPTS as usize
        );
    }
}
