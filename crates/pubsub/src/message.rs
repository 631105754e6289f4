use crate::error::{BoxError, Error, Result};

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;

/// Settles delivered messages on behalf of a backend.
#[async_trait]
pub trait Acknowledger: Debug + Send + Sync + 'static {
    /// Marks the message as processed.
    async fn ack(&self, ack_id: &str) -> std::result::Result<(), BoxError>;

    /// Returns the message to the service for redelivery.
    async fn nack(&self, ack_id: &str) -> std::result::Result<(), BoxError>;
}

/// A message delivered from a subscription.
///
/// Every message must be settled with [`Message::ack`] or [`Message::nack`].
/// Unsettled messages are redelivered once their ack deadline passes.
#[derive(Clone)]
pub struct Message {
    ack_id: String,
    acknowledger: Arc<dyn Acknowledger>,
    data: Bytes,
    delivery_attempt: u32,
    id: String,
    publish_time: SystemTime,
}

impl Message {
    /// Creates a delivered message. Used by backends.
    #[must_use]
    pub fn new(
        id: String,
        data: Bytes,
        publish_time: SystemTime,
        delivery_attempt: u32,
        ack_id: String,
        acknowledger: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            ack_id,
            acknowledger,
            data,
            delivery_attempt,
            id,
            publish_time,
        }
    }

    /// The service-assigned message id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The raw payload.
    #[must_use]
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    /// When the service accepted the message.
    #[must_use]
    pub const fn publish_time(&self) -> SystemTime {
        self.publish_time
    }

    /// How many times this message has been delivered, starting at 1.
    #[must_use]
    pub const fn delivery_attempt(&self) -> u32 {
        self.delivery_attempt
    }

    /// Decodes a JSON payload as published by [`crate::Publisher::publish`].
    ///
    /// # Errors
    /// Returns an error if the payload is not valid JSON for `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.data).map_err(Error::Deserialization)
    }

    /// Acknowledges the message.
    ///
    /// # Errors
    /// Returns an error if the backend rejects the acknowledgment.
    pub async fn ack(self) -> Result<()> {
        self.acknowledger
            .ack(&self.ack_id)
            .await
            .map_err(|source| Error::Acknowledge {
                message_id: self.id.clone(),
                source,
            })
    }

    /// Negatively acknowledges the message so the service redelivers it.
    ///
    /// # Errors
    /// Returns an error if the backend rejects the request.
    pub async fn nack(self) -> Result<()> {
        self.acknowledger
            .nack(&self.ack_id)
            .await
            .map_err(|source| Error::Acknowledge {
                message_id: self.id.clone(),
                source,
            })
    }
}

impl Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("data", &self.data)
            .field("delivery_attempt", &self.delivery_attempt)
            .field("publish_time", &self.publish_time)
            .finish_non_exhaustive()
    }
}
