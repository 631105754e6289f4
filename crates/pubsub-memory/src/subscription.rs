use crate::error::Error;
use crate::service::{MemoryService, Operation, Pull, subscription_path};

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use proven_pubsub::client::{MessageStream, ReceiveSettings, Subscription};
use proven_pubsub::{Acknowledger, BoxError, Message};
use tokio::time::timeout_at;
use tracing::debug;

/// Flow control used until `with_receive_settings` is called.
pub const DEFAULT_RECEIVE_SETTINGS: ReceiveSettings = ReceiveSettings {
    max_outstanding_messages: 1000,
    max_extension: Duration::from_secs(60 * 60),
};

/// A handle to a subscription on a [`MemoryService`].
#[derive(Clone, Debug)]
pub struct MemorySubscription {
    name: String,
    path: String,
    service: MemoryService,
    settings: ReceiveSettings,
}

impl MemorySubscription {
    pub(crate) fn new(service: MemoryService, project_id: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: subscription_path(project_id, name),
            service,
            settings: DEFAULT_RECEIVE_SETTINGS,
        }
    }

    /// Fully-qualified name of the subscription.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Flow control applied to receive streams opened from this handle.
    #[must_use]
    pub const fn receive_settings(&self) -> ReceiveSettings {
        self.settings
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    type Error = Error;

    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> Result<bool, Error> {
        self.service
            .exists(Operation::SubscriptionExists, &self.path)
            .await
    }

    async fn delete(&self) -> Result<(), Error> {
        self.service.record(Operation::DeleteSubscription).await?;
        self.service.delete_subscription(&self.path).await
    }

    fn with_receive_settings(self, settings: ReceiveSettings) -> Self {
        Self { settings, ..self }
    }

    async fn receive(&self) -> Result<MessageStream<Error>, Error> {
        self.service.record(Operation::Receive).await?;

        if !self.service.subscription_exists(&self.path).await {
            return Err(Error::not_found("subscription", &self.path));
        }

        let service = self.service.clone();
        let path = self.path.clone();
        let settings = self.settings;
        let acknowledger: Arc<dyn Acknowledger> = Arc::new(MemoryAcknowledger {
            service: service.clone(),
            subscription: path.clone(),
        });

        debug!(subscription = %path, "opened receive stream");

        let messages = stream! {
            loop {
                let pulled = service
                    .pull(&path, settings.max_outstanding_messages, settings.max_extension)
                    .await;

                match pulled {
                    Ok(Pull::Message { ack_id, message }) => {
                        yield Ok(Message::new(
                            message.id,
                            message.data,
                            message.publish_time,
                            message.delivery_attempt,
                            ack_id,
                            acknowledger.clone(),
                        ));
                    }
                    Ok(Pull::Wait { deadline: Some(deadline), mut wake }) => {
                        let _ = timeout_at(deadline, wake.changed()).await;
                    }
                    Ok(Pull::Wait { deadline: None, mut wake }) => {
                        // The sender is dropped when the subscription is deleted.
                        if wake.changed().await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(messages))
    }
}

#[derive(Debug)]
struct MemoryAcknowledger {
    service: MemoryService,
    subscription: String,
}

impl MemoryAcknowledger {
    async fn settle(&self, ack_id: &str, ack: bool) -> Result<(), BoxError> {
        self.service.record(Operation::Acknowledge).await?;
        self.service.settle(&self.subscription, ack_id, ack).await?;

        Ok(())
    }
}

#[async_trait]
impl Acknowledger for MemoryAcknowledger {
    async fn ack(&self, ack_id: &str) -> Result<(), BoxError> {
        self.settle(ack_id, true).await
    }

    async fn nack(&self, ack_id: &str) -> Result<(), BoxError> {
        self.settle(ack_id, false).await
    }
}
