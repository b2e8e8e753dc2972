//! # Subscribers
//!
//! Defines the receiving side of the bus: the callback trait invoked by the
//! dispatcher, and an async stream adapter for consumers that prefer
//! pulling messages over being called.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::debug;

use crate::bus::PubsubBus;
use crate::channel::SubscriptionHandle;
use crate::error::{DeliveryError, Result};
use crate::filter::EventFilter;
use crate::message::Message;
use crate::security::Principal;

/// Callback receiving messages from a channel.
///
/// Invoked on a dispatcher thread, never on the publisher's thread. Calls
/// for one subscription never overlap and arrive in publish order. An
/// error or panic is logged and does not affect other subscribers.
pub trait Subscriber: Send + Sync {
    fn on_message(&self, message: Message) -> std::result::Result<(), DeliveryError>;
}

impl<F> Subscriber for F
where
    F: Fn(Message) -> std::result::Result<(), DeliveryError> + Send + Sync,
{
    fn on_message(&self, message: Message) -> std::result::Result<(), DeliveryError> {
        self(message)
    }
}

/// Errors from stream operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The subscription was removed or the bus shut down.
    #[error("Subscription closed")]
    Closed,
}

/// Forwards delivered messages into an [`EventStream`].
struct StreamSubscriber {
    sender: mpsc::UnboundedSender<Message>,
}

impl Subscriber for StreamSubscriber {
    fn on_message(&self, message: Message) -> std::result::Result<(), DeliveryError> {
        self.sender
            .send(message)
            .map_err(|_| DeliveryError::new("event stream dropped"))
    }
}

/// Async stream of the messages delivered to one subscription.
///
/// Messages have already passed the filter and authorization checks.
/// The stream ends once the subscription is removed and its backlog has
/// been delivered, or when the bus shuts down.
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<Message>,
}

impl EventStream {
    fn new(receiver: mpsc::UnboundedReceiver<Message>) -> Self {
        Self { receiver }
    }

    /// Receive the next message.
    ///
    /// # Returns
    ///
    /// - `Some(message)` - The next delivered message
    /// - `None` - The subscription is closed
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Try to receive the next message without blocking.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(message))` - A message was available
    /// - `Ok(None)` - No message available (would block)
    /// - `Err(SubscriptionError::Closed)` - The subscription is closed
    pub fn try_recv(&mut self) -> std::result::Result<Option<Message>, SubscriptionError> {
        match self.receiver.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(SubscriptionError::Closed),
        }
    }
}

impl Stream for EventStream {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Subscribe to a channel and receive its messages as a stream.
pub fn subscribe_stream(
    bus: &dyn PubsubBus,
    channel: &str,
    principal: Principal,
    filter: Option<EventFilter>,
) -> Result<(SubscriptionHandle, EventStream)> {
    let (sender, receiver) = mpsc::unbounded_channel();
    let subscriber = Arc::new(StreamSubscriber { sender });
    let handle = bus.subscribe(channel, subscriber, principal, filter)?;
    debug!(channel, subscription = %handle.id(), "Stream subscription opened");
    Ok((handle, EventStream::new(receiver)))
}
