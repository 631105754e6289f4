use crate::client::{Client, Subscription, Topic};
use crate::config::SubscriberConfig;
use crate::connection::ServiceConnection;
use crate::error::{Error, Result};
use crate::handler::{ErrorHandler, MessageHandler};
use crate::receive_loop::ReceiveLoop;

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Capacity of the channel between the receive loop and the message handler.
const HANDOFF_CAPACITY: usize = 1;

const CREATED: u8 = 0;
const PROCESSING: u8 = 1;
const TERMINATED: u8 = 2;

/// Lifecycle of a [`Subscriber`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriberState {
    /// Topic and subscription are resolved; `process` has not been called.
    Created,

    /// The receive loop is running.
    Processing,

    /// The receive loop has ended. The subscriber cannot be restarted.
    Terminated,
}

/// Pulls messages from one subscription and passes them to a handler.
pub struct Subscriber<C, X, E>
where
    C: Client,
    X: MessageHandler,
    E: ErrorHandler,
{
    cancel: Arc<Mutex<Option<CancellationToken>>>,
    error_handler: Arc<E>,
    handler: X,
    state: Arc<AtomicU8>,
    subscription: C::Subscription,
    topic: C::Topic,
}

impl<C, X, E> Subscriber<C, X, E>
where
    C: Client,
    X: MessageHandler,
    E: ErrorHandler,
{
    /// Connects to the configured project and resolves the topic and the
    /// subscription, creating either if absent.
    ///
    /// # Errors
    /// Returns an error if connecting or either resolution fails.
    pub async fn create(
        config: SubscriberConfig,
        options: C::Options,
        handler: X,
        error_handler: E,
    ) -> Result<Self> {
        let SubscriberConfig {
            project_id,
            topic_name,
            subscription_name,
        } = config;

        let connection = ServiceConnection::<C>::connect(project_id, options).await?;

        Self::with_connection(
            &connection,
            &topic_name,
            &subscription_name,
            handler,
            error_handler,
        )
        .await
    }

    /// Resolves the topic and the subscription on an existing connection,
    /// creating either if absent.
    ///
    /// # Errors
    /// Returns an error if either resolution fails.
    pub async fn with_connection(
        connection: &ServiceConnection<C>,
        topic_name: &str,
        subscription_name: &str,
        handler: X,
        error_handler: E,
    ) -> Result<Self> {
        let topic = connection.create_topic(topic_name).await?;
        let subscription = connection
            .create_subscription(subscription_name, &topic)
            .await?;

        Ok(Self {
            cancel: Arc::new(Mutex::new(None)),
            error_handler: Arc::new(error_handler),
            handler,
            state: Arc::new(AtomicU8::new(CREATED)),
            subscription,
            topic,
        })
    }

    /// Starts the receive loop and runs the message handler on the calling
    /// task until it returns.
    ///
    /// The loop runs on `tracker` under a child of `parent`. When it ends,
    /// the handoff channel closes, the error handler is called once with the
    /// reason, and the task finishes, which is what `tracker.wait()` observes.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyStarted`] if `process` was called before.
    pub async fn process(&self, parent: &CancellationToken, tracker: &TaskTracker) -> Result<()> {
        self.state
            .compare_exchange(CREATED, PROCESSING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::AlreadyStarted)?;

        info!(
            topic = self.topic.name(),
            subscription = self.subscription.name(),
            "starting subscriber"
        );

        let (sender, receiver) = mpsc::channel(HANDOFF_CAPACITY);
        let token = parent.child_token();
        *self.cancel.lock() = Some(token.clone());

        let receive_loop = ReceiveLoop::new(self.subscription.clone(), sender, token);
        let cancel = self.cancel.clone();
        let error_handler = self.error_handler.clone();
        let state = self.state.clone();
        let subscription = self.subscription.name().to_string();

        tracker.spawn(async move {
            let error = receive_loop.run().await;

            if error.is_cancelled() {
                info!(subscription = %subscription, "receive loop cancelled");
            } else {
                warn!(subscription = %subscription, error = %error, "receive loop terminated");
            }

            error_handler.handle_error(error);
            stop(&cancel);
            state.store(TERMINATED, Ordering::Release);
        });

        self.handler.handle(receiver).await;

        Ok(())
    }

    /// Cancels the receive loop. Idempotent, and a no-op before `process`.
    pub fn stop(&self) {
        stop(&self.cancel);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriberState {
        match self.state.load(Ordering::Acquire) {
            CREATED => SubscriberState::Created,
            PROCESSING => SubscriberState::Processing,
            _ => SubscriberState::Terminated,
        }
    }

    /// Name of the topic the subscription is bound to.
    pub fn topic_name(&self) -> &str {
        self.topic.name()
    }

    /// Name of the subscription.
    pub fn subscription_name(&self) -> &str {
        self.subscription.name()
    }
}

impl<C, X, E> Debug for Subscriber<C, X, E>
where
    C: Client,
    X: MessageHandler,
    E: ErrorHandler,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("topic", &self.topic)
            .field("subscription", &self.subscription)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn stop(cancel: &Mutex<Option<CancellationToken>>) {
    if let Some(token) = cancel.lock().as_ref() {
        if !token.is_cancelled() {
            info!("stopped the subscriber");
            token.cancel();
        }
    }
}
