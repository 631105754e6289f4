use crate::client::{Client, Topic};
use crate::config::PublisherConfig;
use crate::connection::ServiceConnection;
use crate::error::{Error, PublishError, Result};
use crate::topic_cache::TopicCache;

use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info};

/// Publishes payloads to named topics, resolving and caching each topic on
/// first use.
///
/// Call [`Publisher::stop_all`] before shutting down so buffered publishes
/// are flushed.
#[derive(Clone, Debug)]
pub struct Publisher<C>
where
    C: Client,
{
    connection: ServiceConnection<C>,
    topics: TopicCache<C::Topic>,
}

impl<C> Publisher<C>
where
    C: Client,
{
    /// Connects to the configured project.
    ///
    /// # Errors
    /// Returns [`Error::Connection`] if the service cannot be reached.
    pub async fn new(config: PublisherConfig, options: C::Options) -> Result<Self> {
        let connection = ServiceConnection::connect(config.project_id, options).await?;

        Ok(Self::with_connection(connection))
    }

    /// Creates a publisher on an existing connection.
    #[must_use]
    pub fn with_connection(connection: ServiceConnection<C>) -> Self {
        Self {
            connection,
            topics: TopicCache::new(),
        }
    }

    /// The connection this publisher uses.
    pub const fn connection(&self) -> &ServiceConnection<C> {
        &self.connection
    }

    /// Serializes `payload` as JSON and publishes it to each topic in order,
    /// waiting for every acknowledgment before moving to the next topic.
    ///
    /// Returns one message id per topic. Processing stops at the first
    /// failure; later topics are not attempted and the caller must publish
    /// to them again.
    ///
    /// # Errors
    /// Returns a [`PublishError`] holding the ids acknowledged so far and the
    /// cause: [`Error::Serialization`] before any topic is touched,
    /// [`Error::TopicResolution`] or [`Error::PublishAck`] at the failing
    /// topic.
    pub async fn publish<P, K>(
        &self,
        payload: &P,
        topic_names: &[K],
    ) -> std::result::Result<Vec<String>, PublishError>
    where
        P: Serialize + ?Sized + Sync,
        K: AsRef<str> + Sync,
    {
        let data = Bytes::from(serde_json::to_vec(payload).map_err(Error::Serialization)?);
        let mut message_ids = Vec::with_capacity(topic_names.len());

        for topic_name in topic_names {
            let topic_name = topic_name.as_ref();

            let outcome = match self.topic(topic_name).await {
                Ok(topic) => topic.publish(data.clone()).await.map_err(|e| {
                    error!(topic = topic_name, error = %e, "publish was not acknowledged");
                    Error::PublishAck {
                        topic: topic_name.to_string(),
                        source: Box::new(e),
                    }
                }),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(message_id) => message_ids.push(message_id),
                Err(source) => {
                    return Err(PublishError {
                        message_ids,
                        source,
                    });
                }
            }
        }

        Ok(message_ids)
    }

    /// Flushes every cached topic, waits for outstanding publishes to drain,
    /// and empties the cache. The publisher remains usable.
    pub async fn stop_all(&self) {
        let topics = self.topics.drain().await;
        info!(count = topics.len(), "stopping cached topics");

        join_all(topics.iter().map(|topic| topic.stop())).await;
    }

    /// Number of topics currently cached.
    pub async fn cached_topics(&self) -> usize {
        self.topics.len().await
    }

    async fn topic(&self, name: &str) -> Result<C::Topic> {
        self.topics
            .get_or_try_insert_with(name, || self.connection.create_topic(name))
            .await
    }
}
