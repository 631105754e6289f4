use crate::error::Error;
use crate::service::{MemoryService, Operation, topic_path};
use crate::subscription::MemorySubscription;
use crate::topic::MemoryTopic;

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use proven_pubsub::client::{Client, ClientOptions, SubscriptionConfig};

/// Options for the in-memory client.
#[derive(Clone, Debug, Default)]
pub struct MemoryClientOptions {
    /// The service to connect to.
    pub service: MemoryService,
}

impl ClientOptions for MemoryClientOptions {}

/// A [`Client`] backed by a [`MemoryService`].
#[derive(Clone, Debug)]
pub struct MemoryClient {
    project_id: String,
    service: MemoryService,
}

impl MemoryClient {
    /// The service this client is connected to.
    #[must_use]
    pub const fn service(&self) -> &MemoryService {
        &self.service
    }
}

#[async_trait]
impl Client for MemoryClient {
    type Error = Error;
    type Options = MemoryClientOptions;
    type Topic = MemoryTopic;
    type Subscription = MemorySubscription;

    async fn new(project_id: String, options: MemoryClientOptions) -> Result<Self, Error> {
        let MemoryClientOptions { service } = options;

        service.record(Operation::Connect).await?;

        if project_id.is_empty() || project_id.contains('/') {
            return Err(Error::InvalidProject(project_id));
        }

        Ok(Self {
            project_id,
            service,
        })
    }

    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn topic(&self, name: &str) -> MemoryTopic {
        MemoryTopic::new(self.service.clone(), &self.project_id, name)
    }

    async fn create_topic(&self, name: &str) -> Result<MemoryTopic, Error> {
        self.service.record(Operation::CreateTopic).await?;

        let topic = self.topic(name);
        self.service.create_topic(topic.path()).await?;

        Ok(topic)
    }

    fn subscription(&self, name: &str) -> MemorySubscription {
        MemorySubscription::new(self.service.clone(), &self.project_id, name)
    }

    async fn create_subscription(
        &self,
        name: &str,
        config: SubscriptionConfig,
    ) -> Result<MemorySubscription, Error> {
        self.service.record(Operation::CreateSubscription).await?;

        let subscription = self.subscription(name);
        self.service
            .create_subscription(
                subscription.path(),
                &topic_path(&self.project_id, &config.topic),
                config.ack_deadline,
            )
            .await?;

        Ok(subscription)
    }

    fn subscriptions(&self) -> BoxStream<'static, Result<String, Error>> {
        let project_id = self.project_id.clone();
        let service = self.service.clone();

        Box::pin(stream! {
            if let Err(e) = service.record(Operation::ListSubscriptions).await {
                yield Err::<String, Error>(e);
                return;
            }

            let (names, fail_after) = service.list_subscriptions(&project_id).await;

            for (position, name) in names.into_iter().enumerate() {
                if fail_after == Some(position) {
                    yield Err(Error::Unavailable(Operation::ListSubscriptions));
                    return;
                }

                yield Ok(name);
            }
        })
    }
}
