//! # Channels and Subscriptions
//!
//! A [`Channel`] is a named topic holding its live subscriptions in
//! registration order. The [`ChannelRegistry`] creates channels on first
//! use and guarantees one instance per name.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pubsub_telemetry::ACTIVE_SUBSCRIPTIONS;
use tracing::debug;
use uuid::Uuid;

use crate::dispatcher::DeliveryQueue;
use crate::filter::EventFilter;
use crate::security::Principal;
use crate::subscriber::Subscriber;

/// A subscriber bound to one channel with the identity it was registered as.
pub struct Subscription {
    id: Uuid,
    sequence: u64,
    channel: String,
    subscriber: Arc<dyn Subscriber>,
    principal: Principal,
    filter: Option<EventFilter>,
    created_at: DateTime<Utc>,
}

impl Subscription {
    pub(crate) fn new(
        sequence: u64,
        channel: &str,
        subscriber: Arc<dyn Subscriber>,
        principal: Principal,
        filter: Option<EventFilter>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            channel: channel.to_string(),
            subscriber,
            principal,
            // An empty filter and no filter mean the same thing
            filter: filter.filter(|f| !f.is_empty()),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[must_use]
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    #[must_use]
    pub fn filter(&self) -> Option<&EventFilter> {
        self.filter.as_ref()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn subscriber(&self) -> &dyn Subscriber {
        self.subscriber.as_ref()
    }

    /// Handle identifying this subscription for removal.
    #[must_use]
    pub fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle {
            channel: self.channel.clone(),
            sequence: self.sequence,
            id: self.id,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("sequence", &self.sequence)
            .field("channel", &self.channel)
            .field("principal", &self.principal)
            .field("filter", &self.filter)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Opaque handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    channel: String,
    sequence: u64,
    id: Uuid,
}

impl SubscriptionHandle {
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.channel, self.id)
    }
}

/// A subscription together with the queue feeding its delivery lane.
#[derive(Clone)]
pub(crate) struct SubscriptionEntry {
    pub(crate) subscription: Arc<Subscription>,
    pub(crate) queue: DeliveryQueue,
}

/// Named topic holding the live set of subscriptions.
pub struct Channel {
    name: String,
    subscriptions: RwLock<BTreeMap<u64, SubscriptionEntry>>,
}

impl Channel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscriptions: RwLock::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Point-in-time copy of the subscriptions, in registration order.
    ///
    /// Later additions or removals do not affect a snapshot already taken.
    pub(crate) fn snapshot(&self) -> Vec<SubscriptionEntry> {
        self.subscriptions.read().values().cloned().collect()
    }

    fn insert(&self, entry: SubscriptionEntry) {
        let sequence = entry.subscription.sequence();
        self.subscriptions.write().insert(sequence, entry);
    }

    /// Remove the entry at `sequence` only if it belongs to subscription `id`.
    fn remove_if(&self, sequence: u64, id: Uuid) -> Option<SubscriptionEntry> {
        let mut subscriptions = self.subscriptions.write();
        match subscriptions.get(&sequence) {
            Some(entry) if entry.subscription.id() == id => subscriptions.remove(&sequence),
            _ => None,
        }
    }

    fn clear(&self) -> usize {
        let removed = std::mem::take(&mut *self.subscriptions.write());
        removed.len()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

/// Registry of channels by name.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
    next_sequence: AtomicU64,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the channel for `name`, creating it on first use.
    ///
    /// Concurrent callers always receive the same instance.
    pub fn get_or_create(&self, name: &str) -> Arc<Channel> {
        if let Some(channel) = self.channels.read().get(name) {
            return Arc::clone(channel);
        }

        let mut channels = self.channels.write();
        let channel = channels.entry(name.to_string()).or_insert_with(|| {
            pubsub_telemetry::log_channel_event!(debug, name, "Channel created");
            Arc::new(Channel::new(name))
        });
        Arc::clone(channel)
    }

    /// Look up an existing channel without creating it.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.read().get(name).cloned()
    }

    pub(crate) fn next_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a subscription and the queue feeding its lane.
    pub(crate) fn add_subscription(
        &self,
        channel: &Channel,
        subscription: Arc<Subscription>,
        queue: DeliveryQueue,
    ) -> SubscriptionHandle {
        let handle = subscription.handle();
        channel.insert(SubscriptionEntry {
            subscription,
            queue,
        });
        ACTIVE_SUBSCRIPTIONS.inc();
        debug!(channel = %channel.name(), subscription = %handle.id(), "Subscription added");
        handle
    }

    /// Remove a subscription. Removing twice is a no-op.
    ///
    /// Returns `true` if the subscription was present.
    pub fn remove_subscription(&self, handle: &SubscriptionHandle) -> bool {
        let Some(channel) = self.get(handle.channel()) else {
            return false;
        };

        // A handle from another bus can share channel and sequence
        if channel.remove_if(handle.sequence, handle.id()).is_none() {
            return false;
        }
        ACTIVE_SUBSCRIPTIONS.dec();
        debug!(channel = %handle.channel(), subscription = %handle.id(), "Subscription removed");
        true
    }

    /// Point-in-time view of a channel's subscriptions.
    pub(crate) fn snapshot(&self, channel: &Channel) -> Vec<SubscriptionEntry> {
        channel.snapshot()
    }

    #[must_use]
    pub fn subscription_count(&self, name: &str) -> usize {
        self.get(name).map_or(0, |c| c.subscription_count())
    }

    /// Names of every channel created so far, sorted.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every subscription on every channel, closing their lanes.
    ///
    /// Returns the number of subscriptions removed.
    pub(crate) fn clear(&self) -> usize {
        let channels: Vec<Arc<Channel>> = self.channels.read().values().cloned().collect();
        let removed: usize = channels.iter().map(|c| c.clear()).sum();
        ACTIVE_SUBSCRIPTIONS.sub(removed as f64);
        removed
    }
}
