use crate::client::Subscription;
use crate::error::ReceiveError;
use crate::message::Message;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Pulls messages from a subscription and hands them to the subscriber's
/// message handler, one at a time.
///
/// Every wait is raced against the cancellation token, and waits for the
/// service are also raced against the handler closing its end of the
/// channel. A message that has been received but not yet handed off when
/// the loop stops is nacked so the service redelivers it.
pub struct ReceiveLoop<S>
where
    S: Subscription,
{
    sender: mpsc::Sender<Message>,
    subscription: S,
    token: CancellationToken,
}

impl<S> ReceiveLoop<S>
where
    S: Subscription,
{
    pub const fn new(
        subscription: S,
        sender: mpsc::Sender<Message>,
        token: CancellationToken,
    ) -> Self {
        Self {
            sender,
            subscription,
            token,
        }
    }

    /// Runs until the receive call terminates and returns why.
    ///
    /// Consumes the loop, so the handoff channel is closed by the time this
    /// returns.
    pub async fn run(self) -> ReceiveError {
        let Self {
            sender,
            subscription,
            token,
        } = self;

        let mut messages = tokio::select! {
            biased;
            () = token.cancelled() => return ReceiveError::Cancelled,
            () = sender.closed() => return ReceiveError::HandoffClosed,
            result = subscription.receive() => match result {
                Ok(messages) => messages,
                Err(e) => return ReceiveError::Transport(Box::new(e)),
            },
        };

        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => return ReceiveError::Cancelled,
                () = sender.closed() => return ReceiveError::HandoffClosed,
                next = messages.next() => next,
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => return ReceiveError::Transport(Box::new(e)),
                None => return ReceiveError::StreamClosed,
            };

            let permit = tokio::select! {
                biased;
                () = token.cancelled() => {
                    release(message).await;
                    return ReceiveError::Cancelled;
                }
                permit = sender.reserve() => permit,
            };

            let Ok(permit) = permit else {
                release(message).await;
                return ReceiveError::HandoffClosed;
            };

            debug!(
                subscription = subscription.name(),
                message_id = message.id(),
                "handing off message"
            );
            permit.send(message);
        }
    }
}

async fn release(message: Message) {
    let message_id = message.id().to_string();

    if let Err(e) = message.nack().await {
        warn!(message_id = %message_id, error = %e, "failed to release undelivered message");
    }
}
