use crate::error::ReceiveError;
use crate::message::Message;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Receiving end of a subscriber's handoff channel.
pub type MessageReceiver = mpsc::Receiver<Message>;

/// Consumes delivered messages for a subscriber.
#[async_trait]
pub trait MessageHandler
where
    Self: Send + Sync + 'static,
{
    /// Reads messages until the channel closes.
    ///
    /// The channel closes when the receive loop terminates. Each message
    /// must be acked or nacked; nothing is acknowledged on the handler's
    /// behalf.
    async fn handle(&self, messages: MessageReceiver);
}

/// Observes the termination of a subscriber's receive loop.
pub trait ErrorHandler
where
    Self: Send + Sync + 'static,
{
    /// Called exactly once per `process` call, when the receive loop ends.
    fn handle_error(&self, error: ReceiveError);
}

impl<F> ErrorHandler for F
where
    F: Fn(ReceiveError) + Send + Sync + 'static,
{
    fn handle_error(&self, error: ReceiveError) {
        self(error);
    }
}
