use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

/// Maps topic names to resolved handles.
///
/// The lock is held across resolution, so each name is resolved at most once
/// until the cache is drained, even with concurrent callers.
#[derive(Debug)]
pub struct TopicCache<T> {
    topics: Arc<Mutex<HashMap<String, T>>>,
}

impl<T> Clone for TopicCache<T> {
    fn clone(&self) -> Self {
        Self {
            topics: self.topics.clone(),
        }
    }
}

impl<T> Default for TopicCache<T> {
    fn default() -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> TopicCache<T>
where
    T: Clone + Send,
{
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached handle for `name`, resolving and caching it first
    /// if absent. A failed resolution leaves the cache untouched.
    ///
    /// # Errors
    /// Returns whatever `resolve` fails with.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, name: &str, resolve: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        let mut topics = self.topics.lock().await;

        if let Some(topic) = topics.get(name) {
            debug!(topic = name, "topic cache hit");
            return Ok(topic.clone());
        }

        let topic = resolve().await?;
        topics.insert(name.to_string(), topic.clone());
        drop(topics);

        Ok(topic)
    }

    /// Removes and returns every cached handle.
    pub async fn drain(&self) -> Vec<T> {
        self.topics
            .lock()
            .await
            .drain()
            .map(|(_, topic)| topic)
            .collect()
    }

    /// Number of cached handles.
    pub async fn len(&self) -> usize {
        self.topics.lock().await.len()
    }

    /// Whether the cache holds no handles.
    pub async fn is_empty(&self) -> bool {
        self.topics.lock().await.is_empty()
    }
}
