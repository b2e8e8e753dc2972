//! # Bus Abstraction
//!
//! Backend-agnostic interface to a pub/sub bus. Callers obtain a bus from a
//! [`crate::BusRegistry`] and only ever see `dyn PubsubBus`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::channel::SubscriptionHandle;
use crate::error::{BusError, Result};
use crate::filter::EventFilter;
use crate::message::Message;
use crate::security::Principal;
use crate::subscriber::Subscriber;

/// Lifecycle of a bus. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusState {
    /// Accepting publishes and subscriptions
    Active,
    /// `shutdown()` in progress, waiting for in-flight deliveries
    Draining,
    /// Stopped
    Shutdown,
}

impl BusState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Draining,
            _ => Self::Shutdown,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Draining => 1,
            Self::Shutdown => 2,
        }
    }
}

impl fmt::Display for BusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Shutdown => "shut down",
        };
        f.write_str(name)
    }
}

/// Atomic holder for a [`BusState`].
#[derive(Debug)]
pub(crate) struct Lifecycle(AtomicU8);

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(BusState::Active.as_u8()))
    }

    pub(crate) fn state(&self) -> BusState {
        BusState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Fail with [`BusError::Shutdown`] unless the bus is active.
    pub(crate) fn ensure_active(&self) -> Result<()> {
        match self.state() {
            BusState::Active => Ok(()),
            state => Err(BusError::Shutdown { state }),
        }
    }

    /// Move from active to draining. Returns `false` if shutdown already began.
    pub(crate) fn begin_shutdown(&self) -> bool {
        self.0
            .compare_exchange(
                BusState::Active.as_u8(),
                BusState::Draining.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn finish_shutdown(&self) {
        self.0.store(BusState::Shutdown.as_u8(), Ordering::Release);
    }
}

/// Publishes messages to one channel.
///
/// Obtained from [`PubsubBus::publisher`]. Cheap to clone behind an `Arc`
/// and safe to share between threads.
pub trait EventPublisher: Send + Sync {
    /// Channel this publisher writes to.
    fn channel_name(&self) -> &str;

    /// Publish a message.
    ///
    /// Stamps `channel_name`, plus `event_uuid` and `event_timestamp` when
    /// absent, then queues the message for every current subscription and
    /// returns without waiting for delivery.
    fn publish(&self, message: Message) -> Result<()>;
}

/// A pub/sub bus backend.
pub trait PubsubBus: Send + Sync {
    /// Registry name of this backend.
    fn backend_name(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> BusState;

    /// Publisher for `channel`, creating the channel on first use.
    fn publisher(&self, channel: &str) -> Result<Arc<dyn EventPublisher>>;

    /// Publish to the channel named by the message's `channel_name` property.
    fn publish(&self, message: Message) -> Result<()> {
        let channel = message
            .channel_name()
            .ok_or(BusError::MissingChannel)?
            .to_string();
        self.publisher(&channel)?.publish(message)
    }

    /// Subscribe to `channel` as `principal`.
    ///
    /// The subscriber only receives messages matching `filter` (all messages
    /// when `None`) whose subject, if any, grants `principal` read access.
    fn subscribe(
        &self,
        channel: &str,
        subscriber: Arc<dyn Subscriber>,
        principal: Principal,
        filter: Option<EventFilter>,
    ) -> Result<SubscriptionHandle>;

    /// Remove a subscription. Returns `false` if it was already removed.
    ///
    /// Messages already queued for the subscription are still delivered.
    fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool;

    /// Stop accepting work, wait for queued deliveries up to the configured
    /// grace period, then release the worker pool.
    ///
    /// Idempotent. Never blocks on the async runtime, so it may be called
    /// from async code. Called from a subscriber callback, it does not wait
    /// for the lane running that callback.
    fn shutdown(&self);

    /// Live subscriptions on `channel`.
    fn subscription_count(&self, channel: &str) -> usize;

    /// Names of every channel created so far, sorted.
    fn channel_names(&self) -> Vec<String>;
}
