use crate::service::Operation;

use proven_pubsub::client::ClientError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// A create call found the resource already present.
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Resource kind.
        kind: &'static str,

        /// Fully-qualified resource name.
        name: String,
    },

    /// The publish task panicked or was aborted.
    #[error("publish task failed: {0}")]
    Internal(String),

    /// The project id is empty or contains a path separator.
    #[error("invalid project id {0:?}")]
    InvalidProject(String),

    /// The resource does not exist.
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind.
        kind: &'static str,

        /// Fully-qualified resource name.
        name: String,
    },

    /// The receive stream was broken on purpose.
    #[error("receive stream broken: {0}")]
    StreamBroken(String),

    /// Publish was called on a stopped topic handle.
    #[error("topic {0} has been stopped")]
    TopicStopped(String),

    /// A failure injected with `MemoryService::fail_next`.
    #[error("service unavailable during {0:?}")]
    Unavailable(Operation),
}

impl Error {
    pub(crate) fn already_exists(kind: &'static str, name: &str) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.to_string(),
        }
    }

    pub(crate) fn not_found(kind: &'static str, name: &str) -> Self {
        Self::NotFound {
            kind,
            name: name.to_string(),
        }
    }
}

impl ClientError for Error {}
