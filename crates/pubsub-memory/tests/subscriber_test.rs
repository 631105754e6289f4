//! Subscriber receive loop behaviour against the in-memory service.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use proven_pubsub::{
    Error, MessageHandler, MessageReceiver, Publisher, ReceiveError, ServiceConnection, Subscriber,
    SubscriberConfig, SubscriberState,
};
use proven_pubsub_memory::{
    MemoryClient, MemoryClientOptions, MemoryService, Operation, subscription_path,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, mpsc};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize, PartialEq, Serialize)]
struct Order {
    id: u32,
}

/// Acks every message and reports the decoded order.
struct Collect {
    seen: mpsc::UnboundedSender<Order>,
}

#[async_trait]
impl MessageHandler for Collect {
    async fn handle(&self, mut messages: MessageReceiver) {
        while let Some(message) = messages.recv().await {
            let order = message.decode().expect("Failed to decode order");
            message.ack().await.expect("Failed to ack");
            let _ = self.seen.send(order);
        }
    }
}

/// Holds the channel without reading until released, then nacks everything.
struct Stalled {
    release: Arc<Notify>,
}

#[async_trait]
impl MessageHandler for Stalled {
    async fn handle(&self, mut messages: MessageReceiver) {
        self.release.notified().await;

        while let Some(message) = messages.recv().await {
            message.nack().await.expect("Failed to nack");
        }
    }
}

/// Drops the channel immediately.
struct Hangup;

#[async_trait]
impl MessageHandler for Hangup {
    async fn handle(&self, messages: MessageReceiver) {
        drop(messages);
    }
}

type ErrorSink = Box<dyn Fn(ReceiveError) + Send + Sync>;

fn error_sink() -> (ErrorSink, mpsc::UnboundedReceiver<ReceiveError>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let sink: ErrorSink = Box::new(move |error| {
        let _ = sender.send(error);
    });

    (sink, receiver)
}

async fn connection(service: &MemoryService) -> ServiceConnection<MemoryClient> {
    ServiceConnection::connect(
        "shop",
        MemoryClientOptions {
            service: service.clone(),
        },
    )
    .await
    .expect("Failed to connect")
}

async fn subscriber<X>(
    service: &MemoryService,
    handler: X,
) -> (
    Arc<Subscriber<MemoryClient, X, ErrorSink>>,
    mpsc::UnboundedReceiver<ReceiveError>,
)
where
    X: MessageHandler,
{
    let (sink, errors) = error_sink();
    let subscriber = Subscriber::with_connection(
        &connection(service).await,
        "orders",
        "billing",
        handler,
        sink,
    )
    .await
    .expect("Failed to create subscriber");

    (Arc::new(subscriber), errors)
}

fn spawn_process<X>(
    subscriber: &Arc<Subscriber<MemoryClient, X, ErrorSink>>,
    parent: &CancellationToken,
    tracker: &TaskTracker,
) -> tokio::task::JoinHandle<proven_pubsub::Result<()>>
where
    X: MessageHandler,
{
    let subscriber = subscriber.clone();
    let parent = parent.clone();
    let tracker = tracker.clone();

    tokio::spawn(async move { subscriber.process(&parent, &tracker).await })
}

async fn wait_for_state<X>(subscriber: &Subscriber<MemoryClient, X, ErrorSink>, state: SubscriberState)
where
    X: MessageHandler,
{
    timeout(WAIT, async {
        while subscriber.state() != state {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Timeout waiting for subscriber state");
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_delivers_published_messages_until_stopped() {
    let service = MemoryService::new();
    let (seen_sender, mut seen) = mpsc::unbounded_channel();
    let (subscriber, mut errors) = subscriber(&service, Collect { seen: seen_sender }).await;
    let parent = CancellationToken::new();
    let tracker = TaskTracker::new();

    assert_eq!(subscriber.state(), SubscriberState::Created);
    let process = spawn_process(&subscriber, &parent, &tracker);

    let publisher = Publisher::with_connection(connection(&service).await);
    for id in 0..3 {
        publisher.publish(&Order { id }, &["orders"]).await.unwrap();
    }

    for id in 0..3 {
        let order = timeout(WAIT, seen.recv())
            .await
            .expect("Timeout waiting for order")
            .expect("Handler stopped early");
        assert_eq!(order, Order { id });
    }

    subscriber.stop();
    subscriber.stop();

    timeout(WAIT, process)
        .await
        .expect("Timeout waiting for process")
        .unwrap()
        .unwrap();

    tracker.close();
    timeout(WAIT, tracker.wait())
        .await
        .expect("Timeout waiting for tracker");

    assert_matches!(errors.recv().await, Some(ReceiveError::Cancelled));
    assert!(errors.try_recv().is_err());
    assert_eq!(subscriber.state(), SubscriberState::Terminated);
    assert!(!parent.is_cancelled());

    let path = subscription_path("shop", "billing");
    assert_eq!(service.backlog(&path).await, 0);
    assert_eq!(service.outstanding(&path).await, 0);
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_transport_error_notifies_once_and_closes_channel() {
    let service = MemoryService::new();
    let (seen_sender, _seen) = mpsc::unbounded_channel();
    let (subscriber, mut errors) = subscriber(&service, Collect { seen: seen_sender }).await;
    let parent = CancellationToken::new();
    let tracker = TaskTracker::new();

    let process = spawn_process(&subscriber, &parent, &tracker);
    wait_for_state(&subscriber, SubscriberState::Processing).await;

    service
        .break_receive(&subscription_path("shop", "billing"), "connection reset")
        .await
        .unwrap();

    // The handler returns only once the handoff channel is closed.
    timeout(WAIT, process)
        .await
        .expect("Timeout waiting for process")
        .unwrap()
        .unwrap();

    tracker.close();
    timeout(WAIT, tracker.wait())
        .await
        .expect("Timeout waiting for tracker");

    assert_matches!(errors.recv().await, Some(ReceiveError::Transport(_)));
    assert!(errors.try_recv().is_err());
    assert_eq!(subscriber.state(), SubscriberState::Terminated);
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_parent_cancellation_while_handoff_is_blocked() {
    let service = MemoryService::new();
    let release = Arc::new(Notify::new());
    let (subscriber, mut errors) = subscriber(
        &service,
        Stalled {
            release: release.clone(),
        },
    )
    .await;
    let parent = CancellationToken::new();
    let tracker = TaskTracker::new();

    let process = spawn_process(&subscriber, &parent, &tracker);

    let publisher = Publisher::with_connection(connection(&service).await);
    for id in 0..3 {
        publisher.publish(&Order { id }, &["orders"]).await.unwrap();
    }

    // One message fills the channel and the loop waits to hand off the next.
    let path = subscription_path("shop", "billing");
    timeout(WAIT, async {
        while service.outstanding(&path).await < 2 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Timeout waiting for the loop to block");

    parent.cancel();

    // The loop terminates without any help from the handler.
    tracker.close();
    timeout(WAIT, tracker.wait())
        .await
        .expect("Timeout waiting for tracker");
    assert_matches!(errors.recv().await, Some(ReceiveError::Cancelled));
    assert_eq!(subscriber.state(), SubscriberState::Terminated);

    release.notify_one();
    timeout(WAIT, process)
        .await
        .expect("Timeout waiting for process")
        .unwrap()
        .unwrap();

    assert_eq!(service.outstanding(&path).await, 0);
    assert_eq!(service.backlog(&path).await, 3);
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_handler_hangup_on_idle_subscription_ends_loop() {
    let service = MemoryService::new();
    let (subscriber, mut errors) = subscriber(&service, Hangup).await;
    let parent = CancellationToken::new();
    let tracker = TaskTracker::new();

    // The handler returns at once, so process does too.
    timeout(WAIT, subscriber.process(&parent, &tracker))
        .await
        .expect("Timeout waiting for process")
        .unwrap();

    // Nothing is published, so only the closed channel can end the loop.
    tracker.close();
    timeout(WAIT, tracker.wait())
        .await
        .expect("Timeout waiting for tracker");

    assert_matches!(errors.recv().await, Some(ReceiveError::HandoffClosed));
    assert!(errors.try_recv().is_err());
    assert_eq!(subscriber.state(), SubscriberState::Terminated);
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_handler_hangup_leaves_pending_message() {
    let service = MemoryService::new();
    let (subscriber, mut errors) = subscriber(&service, Hangup).await;
    let parent = CancellationToken::new();
    let tracker = TaskTracker::new();

    let publisher = Publisher::with_connection(connection(&service).await);
    publisher.publish(&Order { id: 9 }, &["orders"]).await.unwrap();

    timeout(WAIT, subscriber.process(&parent, &tracker))
        .await
        .expect("Timeout waiting for process")
        .unwrap();

    tracker.close();
    timeout(WAIT, tracker.wait())
        .await
        .expect("Timeout waiting for tracker");

    assert_matches!(errors.recv().await, Some(ReceiveError::HandoffClosed));

    let path = subscription_path("shop", "billing");
    assert_eq!(service.backlog(&path).await, 1);
    assert_eq!(service.outstanding(&path).await, 0);
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_process_twice_fails() {
    let service = MemoryService::new();
    let (seen_sender, _seen) = mpsc::unbounded_channel();
    let (subscriber, _errors) = subscriber(&service, Collect { seen: seen_sender }).await;
    let parent = CancellationToken::new();
    let tracker = TaskTracker::new();

    let process = spawn_process(&subscriber, &parent, &tracker);
    wait_for_state(&subscriber, SubscriberState::Processing).await;

    assert_matches!(
        subscriber.process(&parent, &tracker).await,
        Err(Error::AlreadyStarted)
    );

    parent.cancel();
    timeout(WAIT, process)
        .await
        .expect("Timeout waiting for process")
        .unwrap()
        .unwrap();

    // Terminated subscribers cannot be restarted either.
    assert_matches!(
        subscriber.process(&parent, &tracker).await,
        Err(Error::AlreadyStarted)
    );
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_create_from_config() {
    let service = MemoryService::new();
    let (sink, _errors) = error_sink();
    let (seen_sender, _seen) = mpsc::unbounded_channel();

    let subscriber = Subscriber::<MemoryClient, _, _>::create(
        SubscriberConfig {
            project_id: "shop".to_string(),
            topic_name: "orders".to_string(),
            subscription_name: "billing".to_string(),
        },
        MemoryClientOptions {
            service: service.clone(),
        },
        Collect { seen: seen_sender },
        sink,
    )
    .await
    .unwrap();

    assert_eq!(subscriber.topic_name(), "orders");
    assert_eq!(subscriber.subscription_name(), "billing");
    assert_eq!(subscriber.state(), SubscriberState::Created);

    let names = connection(&service)
        .await
        .list_all_subscriptions()
        .await
        .unwrap();
    assert_eq!(names, vec![subscription_path("shop", "billing")]);

    // Stopping before process is a no-op.
    subscriber.stop();
    assert_eq!(subscriber.state(), SubscriberState::Created);
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_existing_subscription_is_reused_for_processing() {
    let service = MemoryService::new();
    let connection = connection(&service).await;
    let topic = connection.create_topic("orders").await.unwrap();
    connection
        .create_subscription("billing", &topic)
        .await
        .unwrap();

    let (seen_sender, mut seen) = mpsc::unbounded_channel();
    let (subscriber, _errors) = subscriber(&service, Collect { seen: seen_sender }).await;
    assert_eq!(service.calls(Operation::CreateSubscription).await, 1);

    let parent = CancellationToken::new();
    let tracker = TaskTracker::new();
    let process = spawn_process(&subscriber, &parent, &tracker);

    Publisher::with_connection(connection)
        .publish(&Order { id: 11 }, &["orders"])
        .await
        .unwrap();

    let order = timeout(WAIT, seen.recv())
        .await
        .expect("Timeout waiting for order")
        .expect("Handler stopped early");
    assert_eq!(order, Order { id: 11 });

    parent.cancel();
    timeout(WAIT, process)
        .await
        .expect("Timeout waiting for process")
        .unwrap()
        .unwrap();
}

#[tracing_test::traced_test]
#[tokio::test]
async fn test_cancellation_while_waiting_for_next_message() {
    let service = MemoryService::new();
    let (seen_sender, mut seen) = mpsc::unbounded_channel();
    let (subscriber, mut errors) = subscriber(&service, Collect { seen: seen_sender }).await;
    let parent = CancellationToken::new();
    let tracker = TaskTracker::new();

    let process = spawn_process(&subscriber, &parent, &tracker);
    wait_for_state(&subscriber, SubscriberState::Processing).await;
    sleep(Duration::from_millis(20)).await;

    parent.cancel();

    timeout(WAIT, process)
        .await
        .expect("Timeout waiting for process")
        .unwrap()
        .unwrap();

    tracker.close();
    timeout(WAIT, tracker.wait())
        .await
        .expect("Timeout waiting for tracker");

    assert_matches!(errors.recv().await, Some(ReceiveError::Cancelled));
    assert!(seen.try_recv().is_err());
}
