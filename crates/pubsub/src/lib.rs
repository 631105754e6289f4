//! Publisher and subscriber roles over a managed publish/subscribe service.
//!
//! The service itself is reached through the [`client::Client`] capability;
//! this crate coordinates topic resolution and caching, confirmed publishing,
//! and the subscriber receive loop.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Capabilities a messaging backend provides.
pub mod client;

/// Publisher and subscriber configuration.
pub mod config;

/// Check-then-act resolution of topics and subscriptions.
pub mod connection;

mod error;

/// Handlers supplied by subscriber users.
pub mod handler;

/// Delivered messages.
pub mod message;

mod publisher;
mod receive_loop;
mod subscriber;

/// Name to handle cache used by publishers.
pub mod topic_cache;

pub use config::{PublisherConfig, SubscriberConfig};
pub use connection::ServiceConnection;
pub use error::{BoxError, Error, PublishError, ReceiveError, Result};
pub use handler::{ErrorHandler, MessageHandler, MessageReceiver};
pub use message::{Acknowledger, Message};
pub use publisher::Publisher;
pub use subscriber::{Subscriber, SubscriberState};
