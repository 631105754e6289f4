//! In-memory implementation of the pubsub client capability.
//!
//! A [`MemoryService`] holds topics and subscriptions for any number of
//! projects. It counts every call and can fail chosen operations, which makes
//! it the test double for publishers and subscribers.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod client;
mod error;
mod service;
mod subscription;
mod topic;

pub use client::{MemoryClient, MemoryClientOptions};
pub use error::Error;
pub use service::{MemoryService, Operation, subscription_path, topic_path};
pub use subscription::{DEFAULT_RECEIVE_SETTINGS, MemorySubscription};
pub use topic::MemoryTopic;
