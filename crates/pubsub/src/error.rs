use thiserror::Error;

/// Boxed error produced by a messaging backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned synchronously by publishers, subscribers and connections.
#[derive(Debug, Error)]
pub enum Error {
    /// Acknowledging or negatively acknowledging a message failed.
    #[error("failed to settle message {message_id}: {source}")]
    Acknowledge {
        /// Service-assigned id of the message.
        message_id: String,

        /// Backend error.
        #[source]
        source: BoxError,
    },

    /// `process` was called on a subscriber that is not in the created state.
    #[error("subscriber already started")]
    AlreadyStarted,

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// The messaging service could not be reached or refused the client.
    #[error("failed to connect to project {project_id}: {source}")]
    Connection {
        /// Project the connection was opened for.
        project_id: String,

        /// Backend error.
        #[source]
        source: BoxError,
    },

    /// Deleting a subscription failed.
    #[error("failed to delete subscription {subscription}: {source}")]
    DeleteSubscription {
        /// Subscription name.
        subscription: String,

        /// Backend error.
        #[source]
        source: BoxError,
    },

    /// A delivered payload could not be decoded.
    #[error("failed to decode message payload: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// Listing subscriptions aborted part way through.
    #[error("listing subscriptions failed after {count} entries: {source}", count = .collected.len())]
    ListSubscriptions {
        /// Names gathered before the failure.
        collected: Vec<String>,

        /// Backend error.
        #[source]
        source: BoxError,
    },

    /// The service did not acknowledge a publish.
    #[error("publish to topic {topic} was not acknowledged: {source}")]
    PublishAck {
        /// Topic name.
        topic: String,

        /// Backend error.
        #[source]
        source: BoxError,
    },

    /// A payload could not be serialized.
    #[error("failed to serialize payload: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Checking or creating a subscription failed.
    #[error("failed to resolve subscription {subscription}: {source}")]
    SubscriptionResolution {
        /// Subscription name.
        subscription: String,

        /// Backend error.
        #[source]
        source: BoxError,
    },

    /// Checking or creating a topic failed.
    #[error("failed to resolve topic {topic}: {source}")]
    TopicResolution {
        /// Topic name.
        topic: String,

        /// Backend error.
        #[source]
        source: BoxError,
    },
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A publish that stopped at a failing topic.
///
/// Topics listed after the failing one were not attempted. `message_ids`
/// holds the acknowledgments gathered before the failure, in topic order.
#[derive(Debug, Error)]
#[error("publish stopped after {count} acknowledged topic(s): {source}", count = .message_ids.len())]
pub struct PublishError {
    /// Ids acknowledged before the failure.
    pub message_ids: Vec<String>,

    /// Cause of the failure.
    #[source]
    pub source: Error,
}

impl PublishError {
    /// Discards the partial acknowledgments and returns the cause.
    #[must_use]
    pub fn into_inner(self) -> Error {
        self.source
    }
}

impl From<Error> for PublishError {
    fn from(source: Error) -> Self {
        Self {
            message_ids: Vec::new(),
            source,
        }
    }
}

/// Reasons a receive loop terminated. Delivered to the subscriber's error
/// handler exactly once, never returned.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// The subscriber was stopped or the parent token was cancelled.
    #[error("receive cancelled")]
    Cancelled,

    /// The message handler dropped its end of the handoff channel.
    #[error("handoff channel closed by the message handler")]
    HandoffClosed,

    /// The service ended the receive stream.
    #[error("receive stream closed by the service")]
    StreamClosed,

    /// The receive stream failed.
    #[error("receive transport error: {0}")]
    Transport(#[source] BoxError),
}

impl ReceiveError {
    /// Whether the loop ended because it was asked to.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
