use crate::message::Message;

use std::error::Error;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Stream of delivered messages returned by [`Subscription::receive`].
pub type MessageStream<E> = BoxStream<'static, Result<Message, E>>;

/// Marker trait for client errors
pub trait ClientError: Error + Send + Sync + 'static {}

/// Marker trait for client options
pub trait ClientOptions: Clone + Debug + Send + Sync + 'static {}

/// Settings applied when a subscription is created on the service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionConfig {
    /// Name of the topic the subscription is bound to.
    pub topic: String,

    /// Time a consumer has to settle a delivered message before the service
    /// redelivers it.
    pub ack_deadline: Duration,
}

/// Local flow control for a receive stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReceiveSettings {
    /// Maximum number of delivered but unsettled messages.
    pub max_outstanding_messages: usize,

    /// Maximum time a message's deadline may be extended while it is being
    /// processed.
    pub max_extension: Duration,
}

/// A thin client for a remote publish/subscribe service, scoped to one
/// project.
#[async_trait]
pub trait Client
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the client.
    type Error: ClientError;

    /// The options for the client.
    type Options: ClientOptions;

    /// The topic handle type.
    type Topic: Topic<Error = Self::Error>;

    /// The subscription handle type.
    type Subscription: Subscription<Error = Self::Error>;

    /// Connects to the service for the given project.
    async fn new(project_id: String, options: Self::Options) -> Result<Self, Self::Error>;

    /// The project this client is scoped to.
    fn project_id(&self) -> &str;

    /// Returns a handle to a topic without checking that it exists.
    fn topic(&self, name: &str) -> Self::Topic;

    /// Creates a topic. Fails if it already exists.
    async fn create_topic(&self, name: &str) -> Result<Self::Topic, Self::Error>;

    /// Returns a handle to a subscription without checking that it exists.
    fn subscription(&self, name: &str) -> Self::Subscription;

    /// Creates a subscription. Fails if it already exists.
    async fn create_subscription(
        &self,
        name: &str,
        config: SubscriptionConfig,
    ) -> Result<Self::Subscription, Self::Error>;

    /// Lists the fully-qualified names of every subscription in the project.
    fn subscriptions(&self) -> BoxStream<'static, Result<String, Self::Error>>;
}

/// A handle to a remote topic.
#[async_trait]
pub trait Topic
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the topic.
    type Error: ClientError;

    /// The short name of the topic.
    fn name(&self) -> &str;

    /// Checks whether the topic exists on the service.
    async fn exists(&self) -> Result<bool, Self::Error>;

    /// Publishes data and waits for the service to acknowledge it, returning
    /// the assigned message id.
    async fn publish(&self, data: Bytes) -> Result<String, Self::Error>;

    /// Flushes outstanding publishes and waits for them to drain. The handle
    /// rejects further publishes afterwards.
    async fn stop(&self);
}

/// A handle to a remote subscription.
#[async_trait]
pub trait Subscription
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the subscription.
    type Error: ClientError;

    /// The short name of the subscription.
    fn name(&self) -> &str;

    /// Checks whether the subscription exists on the service.
    async fn exists(&self) -> Result<bool, Self::Error>;

    /// Deletes the subscription from the service.
    async fn delete(&self) -> Result<(), Self::Error>;

    /// Applies flow control used by subsequent calls to `receive`.
    #[must_use]
    fn with_receive_settings(self, settings: ReceiveSettings) -> Self;

    /// Opens a long-lived receive stream.
    ///
    /// The stream yields messages until the service ends it or an error is
    /// yielded. Delivered messages must be acked or nacked by the consumer.
    async fn receive(&self) -> Result<MessageStream<Self::Error>, Self::Error>;
}
