use crate::error::Error;
use crate::service::{MemoryService, Operation, topic_path};

use async_trait::async_trait;
use bytes::Bytes;
use proven_pubsub::client::Topic;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// A handle to a topic on a [`MemoryService`].
///
/// Publishes run as tasks on the handle's tracker so that `stop` can wait for
/// them. Clones share the tracker.
#[derive(Clone, Debug)]
pub struct MemoryTopic {
    name: String,
    path: String,
    service: MemoryService,
    tracker: TaskTracker,
}

impl MemoryTopic {
    pub(crate) fn new(service: MemoryService, project_id: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: topic_path(project_id, name),
            service,
            tracker: TaskTracker::new(),
        }
    }

    /// Fully-qualified name of the topic.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether `stop` has been called on this handle or a clone of it.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.tracker.is_closed()
    }
}

#[async_trait]
impl Topic for MemoryTopic {
    type Error = Error;

    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> Result<bool, Error> {
        self.service.exists(Operation::TopicExists, &self.path).await
    }

    async fn publish(&self, data: Bytes) -> Result<String, Error> {
        if self.tracker.is_closed() {
            return Err(Error::TopicStopped(self.path.clone()));
        }

        self.service.record(Operation::Publish).await?;

        let service = self.service.clone();
        let path = self.path.clone();

        self.tracker
            .spawn(async move { service.publish(&path, data).await })
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
    }

    async fn stop(&self) {
        self.tracker.close();
        self.tracker.wait().await;

        // Stop cannot fail. Injected failures are only counted.
        if let Err(e) = self.service.record(Operation::StopTopic).await {
            debug!(topic = %self.path, error = %e, "ignored injected stop failure");
        }

        debug!(topic = %self.path, "topic flushed");
    }
}
