use crate::client::{Client, ReceiveSettings, Subscription, SubscriptionConfig, Topic};
use crate::error::{Error, Result};

use std::time::Duration;

use futures::StreamExt;
use tracing::{error, info};

/// Ack deadline applied to subscriptions created by this layer.
pub const ACK_DEADLINE: Duration = Duration::from_secs(60);

/// Maximum number of unsettled messages a subscriber holds at once.
pub const MAX_OUTSTANDING_MESSAGES: usize = 100;

/// Maximum time a message's deadline is extended while it is processed.
pub const MAX_EXTENSION: Duration = Duration::from_secs(10);

/// Receive settings attached to every subscription handle this layer
/// returns.
pub const RECEIVE_SETTINGS: ReceiveSettings = ReceiveSettings {
    max_outstanding_messages: MAX_OUTSTANDING_MESSAGES,
    max_extension: MAX_EXTENSION,
};

/// A connection to the messaging service for one project.
///
/// Resolution is check-then-act: an existence check followed by a create
/// when absent. Another creator winning the race makes the create fail, and
/// that failure is returned as is.
#[derive(Clone, Debug)]
pub struct ServiceConnection<C>
where
    C: Client,
{
    client: C,
}

impl<C> ServiceConnection<C>
where
    C: Client,
{
    /// Connects to the service for `project_id`.
    ///
    /// # Errors
    /// Returns [`Error::Connection`] if the client cannot be established.
    pub async fn connect<K>(project_id: K, options: C::Options) -> Result<Self>
    where
        K: Into<String> + Send,
    {
        let project_id = project_id.into();

        let client = C::new(project_id.clone(), options).await.map_err(|e| {
            error!(project_id = %project_id, error = %e, "failed to connect to messaging service");
            Error::Connection {
                project_id,
                source: Box::new(e),
            }
        })?;

        Ok(Self { client })
    }

    /// Wraps an already connected client.
    pub const fn from_client(client: C) -> Self {
        Self { client }
    }

    /// The underlying client.
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// The project this connection is scoped to.
    pub fn project_id(&self) -> &str {
        self.client.project_id()
    }

    /// Checks whether a topic exists.
    ///
    /// # Errors
    /// Returns [`Error::TopicResolution`] if the check fails.
    pub async fn topic_exists(&self, name: &str) -> Result<bool> {
        self.client
            .topic(name)
            .exists()
            .await
            .map_err(|e| Error::TopicResolution {
                topic: name.to_string(),
                source: Box::new(e),
            })
    }

    /// Returns a handle to the topic, creating it first if it does not exist.
    ///
    /// # Errors
    /// Returns [`Error::TopicResolution`] if the check or the create fails.
    pub async fn create_topic(&self, name: &str) -> Result<C::Topic> {
        let exists = self.topic_exists(name).await.inspect_err(|e| {
            error!(topic = name, error = %e, "could not check if topic exists");
        })?;

        if exists {
            return Ok(self.client.topic(name));
        }

        let topic = self.client.create_topic(name).await.map_err(|e| {
            error!(topic = name, error = %e, "could not create topic");
            Error::TopicResolution {
                topic: name.to_string(),
                source: Box::new(e),
            }
        })?;
        info!(topic = name, "created topic");

        Ok(topic)
    }

    /// Checks whether a subscription exists.
    ///
    /// # Errors
    /// Returns [`Error::SubscriptionResolution`] if the check fails.
    pub async fn subscription_exists(&self, name: &str) -> Result<bool> {
        self.client
            .subscription(name)
            .exists()
            .await
            .map_err(|e| Error::SubscriptionResolution {
                subscription: name.to_string(),
                source: Box::new(e),
            })
    }

    /// Returns a handle to the subscription, creating it bound to `topic` if
    /// it does not exist. New subscriptions get [`ACK_DEADLINE`]; the handle
    /// always carries [`RECEIVE_SETTINGS`].
    ///
    /// # Errors
    /// Returns [`Error::SubscriptionResolution`] if the check or the create
    /// fails.
    pub async fn create_subscription(
        &self,
        name: &str,
        topic: &C::Topic,
    ) -> Result<C::Subscription> {
        let exists = self.subscription_exists(name).await.inspect_err(|e| {
            error!(subscription = name, error = %e, "could not check if subscription exists");
        })?;

        let subscription = if exists {
            self.client.subscription(name)
        } else {
            let config = SubscriptionConfig {
                topic: topic.name().to_string(),
                ack_deadline: ACK_DEADLINE,
            };

            let subscription = self
                .client
                .create_subscription(name, config)
                .await
                .map_err(|e| {
                    error!(subscription = name, error = %e, "could not create subscription");
                    Error::SubscriptionResolution {
                        subscription: name.to_string(),
                        source: Box::new(e),
                    }
                })?;
            info!(subscription = name, topic = topic.name(), "created subscription");

            subscription
        };

        Ok(subscription.with_receive_settings(RECEIVE_SETTINGS))
    }

    /// Deletes a subscription.
    ///
    /// # Errors
    /// Returns [`Error::DeleteSubscription`] if the service rejects the delete.
    pub async fn delete_subscription(&self, name: &str) -> Result<()> {
        self.client
            .subscription(name)
            .delete()
            .await
            .map_err(|e| Error::DeleteSubscription {
                subscription: name.to_string(),
                source: Box::new(e),
            })
    }

    /// Lists every subscription in the project, in service order.
    ///
    /// # Errors
    /// Returns [`Error::ListSubscriptions`] carrying the names gathered so far
    /// if the listing fails part way through.
    pub async fn list_all_subscriptions(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut listing = self.client.subscriptions();

        while let Some(item) = listing.next().await {
            match item {
                Ok(name) => names.push(name),
                Err(e) => {
                    error!(error = %e, "could not list all subscriptions");
                    return Err(Error::ListSubscriptions {
                        collected: names,
                        source: Box::new(e),
                    });
                }
            }
        }

        Ok(names)
    }
}
