use crate::error::Error;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use uuid::Uuid;

const TOPIC: &str = "topic";
const SUBSCRIPTION: &str = "subscription";

/// Remote operations the in-memory service counts and can fail on demand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Settling a delivered message.
    Acknowledge,
    /// Opening a client.
    Connect,
    /// Creating a subscription.
    CreateSubscription,
    /// Creating a topic.
    CreateTopic,
    /// Deleting a subscription.
    DeleteSubscription,
    /// Listing subscriptions.
    ListSubscriptions,
    /// Publishing a message.
    Publish,
    /// Opening a receive stream.
    Receive,
    /// Flushing a topic handle.
    StopTopic,
    /// Checking that a subscription exists.
    SubscriptionExists,
    /// Checking that a topic exists.
    TopicExists,
}

/// Fully-qualified name of a topic.
#[must_use]
pub fn topic_path(project_id: &str, topic: &str) -> String {
    format!("projects/{project_id}/topics/{topic}")
}

/// Fully-qualified name of a subscription.
#[must_use]
pub fn subscription_path(project_id: &str, subscription: &str) -> String {
    format!("projects/{project_id}/subscriptions/{subscription}")
}

#[derive(Clone, Debug)]
pub(crate) struct StoredMessage {
    pub data: Bytes,
    pub delivery_attempt: u32,
    pub id: String,
    pub publish_time: SystemTime,
}

#[derive(Debug)]
struct Lease {
    deadline: Instant,
    message: StoredMessage,
}

#[derive(Debug, Default)]
struct TopicState {
    published: usize,
}

#[derive(Debug)]
struct SubscriptionState {
    ack_deadline: Duration,
    backlog: VecDeque<StoredMessage>,
    broken: Option<String>,
    leases: HashMap<String, Lease>,
    topic: String,
    wake: watch::Sender<()>,
}

impl SubscriptionState {
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(ack_id, _)| ack_id.clone())
            .collect();

        for ack_id in expired {
            if let Some(lease) = self.leases.remove(&ack_id) {
                self.requeue(lease.message);
            }
        }
    }

    fn requeue(&mut self, mut message: StoredMessage) {
        message.delivery_attempt += 1;
        self.backlog.push_front(message);
    }
}

#[derive(Debug, Default)]
struct State {
    absent_reports: HashMap<Operation, usize>,
    calls: HashMap<Operation, usize>,
    failures: HashMap<Operation, usize>,
    listing_failure_after: Option<usize>,
    next_message_id: u64,
    subscriptions: BTreeMap<String, SubscriptionState>,
    topics: BTreeMap<String, TopicState>,
}

/// Outcome of a single pull from a subscription.
#[derive(Debug)]
pub(crate) enum Pull {
    /// A message was leased.
    Message {
        ack_id: String,
        message: StoredMessage,
    },

    /// Nothing deliverable. Wait for a change or for the earliest lease to
    /// expire.
    Wait {
        deadline: Option<Instant>,
        wake: watch::Receiver<()>,
    },
}

/// An in-process stand-in for the remote messaging service.
///
/// Clones share state. Clients connect to it through
/// [`crate::MemoryClientOptions`].
#[derive(Clone, Debug, Default)]
pub struct MemoryService {
    state: Arc<Mutex<State>>,
}

impl MemoryService {
    /// Creates an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `operation` has been called.
    pub async fn calls(&self, operation: Operation) -> usize {
        self.state
            .lock()
            .await
            .calls
            .get(&operation)
            .copied()
            .unwrap_or_default()
    }

    /// Number of calls across all operations.
    pub async fn total_calls(&self) -> usize {
        self.state.lock().await.calls.values().sum()
    }

    /// Makes the next call of `operation` fail with [`Error::Unavailable`].
    /// Repeated calls queue further failures.
    pub async fn fail_next(&self, operation: Operation) {
        *self
            .state
            .lock()
            .await
            .failures
            .entry(operation)
            .or_default() += 1;
    }

    /// Makes the next existence check of `operation` report the resource as
    /// absent even if it exists, so the caller goes on to create it and
    /// collides with the existing one. Only [`Operation::TopicExists`] and
    /// [`Operation::SubscriptionExists`] are affected.
    pub async fn report_absent_next(&self, operation: Operation) {
        *self
            .state
            .lock()
            .await
            .absent_reports
            .entry(operation)
            .or_default() += 1;
    }

    /// Makes the next subscription listing fail after yielding `count` names.
    pub async fn fail_listing_after(&self, count: usize) {
        self.state.lock().await.listing_failure_after = Some(count);
    }

    /// Breaks open receive streams on a subscription: the next pull fails
    /// with [`Error::StreamBroken`].
    ///
    /// # Errors
    /// Returns an error if the subscription does not exist.
    pub async fn break_receive(&self, subscription: &str, reason: &str) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let entry = state
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| Error::not_found(SUBSCRIPTION, subscription))?;

        entry.broken = Some(reason.to_string());
        entry.wake.send_replace(());

        Ok(())
    }

    /// Number of messages published to a topic.
    pub async fn published(&self, topic: &str) -> usize {
        self.state
            .lock()
            .await
            .topics
            .get(topic)
            .map_or(0, |topic| topic.published)
    }

    /// Number of messages waiting for delivery on a subscription.
    pub async fn backlog(&self, subscription: &str) -> usize {
        self.state
            .lock()
            .await
            .subscriptions
            .get(subscription)
            .map_or(0, |entry| entry.backlog.len())
    }

    /// Number of delivered but unsettled messages on a subscription.
    pub async fn outstanding(&self, subscription: &str) -> usize {
        self.state
            .lock()
            .await
            .subscriptions
            .get(subscription)
            .map_or(0, |entry| entry.leases.len())
    }

    pub(crate) async fn record(&self, operation: Operation) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        *state.calls.entry(operation).or_default() += 1;

        match state.failures.get_mut(&operation) {
            Some(pending) if *pending > 0 => {
                *pending -= 1;
                Err(Error::Unavailable(operation))
            }
            _ => Ok(()),
        }
    }

    /// Counts and answers an existence check for a topic or subscription.
    pub(crate) async fn exists(&self, operation: Operation, name: &str) -> Result<bool, Error> {
        self.record(operation).await?;

        let mut state = self.state.lock().await;
        if let Some(pending) = state.absent_reports.get_mut(&operation).filter(|p| **p > 0) {
            *pending -= 1;
            return Ok(false);
        }

        Ok(match operation {
            Operation::TopicExists => state.topics.contains_key(name),
            _ => state.subscriptions.contains_key(name),
        })
    }

    pub(crate) async fn create_topic(&self, topic: &str) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        if state.topics.contains_key(topic) {
            return Err(Error::already_exists(TOPIC, topic));
        }

        state.topics.insert(topic.to_string(), TopicState::default());

        Ok(())
    }

    pub(crate) async fn publish(&self, topic: &str, data: Bytes) -> Result<String, Error> {
        let mut state = self.state.lock().await;
        let State {
            next_message_id,
            subscriptions,
            topics,
            ..
        } = &mut *state;

        let entry = topics
            .get_mut(topic)
            .ok_or_else(|| Error::not_found(TOPIC, topic))?;
        entry.published += 1;

        *next_message_id += 1;
        let message = StoredMessage {
            data,
            delivery_attempt: 1,
            id: next_message_id.to_string(),
            publish_time: SystemTime::now(),
        };

        for subscription in subscriptions.values_mut().filter(|s| s.topic == topic) {
            subscription.backlog.push_back(message.clone());
            subscription.wake.send_replace(());
        }

        Ok(message.id)
    }

    pub(crate) async fn subscription_exists(&self, subscription: &str) -> bool {
        self.state.lock().await.subscriptions.contains_key(subscription)
    }

    pub(crate) async fn create_subscription(
        &self,
        subscription: &str,
        topic: &str,
        ack_deadline: Duration,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        if !state.topics.contains_key(topic) {
            return Err(Error::not_found(TOPIC, topic));
        }
        if state.subscriptions.contains_key(subscription) {
            return Err(Error::already_exists(SUBSCRIPTION, subscription));
        }

        state.subscriptions.insert(
            subscription.to_string(),
            SubscriptionState {
                ack_deadline,
                backlog: VecDeque::new(),
                broken: None,
                leases: HashMap::new(),
                topic: topic.to_string(),
                wake: watch::channel(()).0,
            },
        );

        Ok(())
    }

    pub(crate) async fn delete_subscription(&self, subscription: &str) -> Result<(), Error> {
        self.state
            .lock()
            .await
            .subscriptions
            .remove(subscription)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(SUBSCRIPTION, subscription))
    }

    /// Subscription names under a project, plus the position at which the
    /// listing should fail, if a failure was requested.
    pub(crate) async fn list_subscriptions(&self, project_id: &str) -> (Vec<String>, Option<usize>) {
        let prefix = subscription_path(project_id, "");
        let mut state = self.state.lock().await;

        let names = state
            .subscriptions
            .keys()
            .filter(|name| name.starts_with(&prefix))
            .cloned()
            .collect();

        (names, state.listing_failure_after.take())
    }

    /// Leases the next deliverable message. A message stays leased for the
    /// ack deadline or `max_extension`, whichever is longer.
    pub(crate) async fn pull(
        &self,
        subscription: &str,
        max_outstanding: usize,
        max_extension: Duration,
    ) -> Result<Pull, Error> {
        let mut state = self.state.lock().await;
        let entry = state
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| Error::not_found(SUBSCRIPTION, subscription))?;

        if let Some(reason) = entry.broken.take() {
            return Err(Error::StreamBroken(reason));
        }

        let now = Instant::now();
        entry.reclaim_expired(now);

        if entry.leases.len() < max_outstanding {
            if let Some(message) = entry.backlog.pop_front() {
                let ack_id = Uuid::new_v4().to_string();
                let deadline = now + entry.ack_deadline.max(max_extension);

                entry.leases.insert(
                    ack_id.clone(),
                    Lease {
                        deadline,
                        message: message.clone(),
                    },
                );

                return Ok(Pull::Message { ack_id, message });
            }
        }

        Ok(Pull::Wait {
            deadline: entry.leases.values().map(|lease| lease.deadline).min(),
            wake: entry.wake.subscribe(),
        })
    }

    /// Settles a leased message. Unknown ack ids (for example after the lease
    /// expired) are ignored, as the real service does.
    pub(crate) async fn settle(&self, subscription: &str, ack_id: &str, ack: bool) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let entry = state
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| Error::not_found(SUBSCRIPTION, subscription))?;

        if let Some(lease) = entry.leases.remove(ack_id) {
            if !ack {
                entry.requeue(lease.message);
            }
            entry.wake.send_replace(());
        }

        Ok(())
    }
}
