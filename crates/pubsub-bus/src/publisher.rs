//! # In-Memory Bus
//!
//! Single-process implementation of [`PubsubBus`], registered as
//! `"in-memory"`. Publishing stamps the message and queues it on every
//! current subscription's delivery lane; the publisher never waits for
//! subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pubsub_telemetry::MESSAGES_PUBLISHED;
use tracing::{debug, info, trace, warn};

use crate::bus::{BusState, EventPublisher, Lifecycle, PubsubBus};
use crate::channel::{Channel, ChannelRegistry, Subscription, SubscriptionHandle};
use crate::config::BusConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::filter::EventFilter;
use crate::message::Message;
use crate::registry::DEFAULT_BACKEND;
use crate::security::Principal;
use crate::subscriber::Subscriber;

/// State shared by the bus and every publisher it hands out.
struct BusCore {
    config: BusConfig,
    lifecycle: Lifecycle,
    channels: ChannelRegistry,
    dispatcher: Dispatcher,
    events_published: AtomicU64,
}

/// Publisher bound to one channel of an [`InMemoryPubsubBus`].
pub struct ChannelPublisher {
    channel: Arc<Channel>,
    core: Arc<BusCore>,
}

impl EventPublisher for ChannelPublisher {
    fn channel_name(&self) -> &str {
        self.channel.name()
    }

    fn publish(&self, mut message: Message) -> Result<()> {
        self.core.lifecycle.ensure_active()?;

        message.stamp(self.channel.name());
        self.core.events_published.fetch_add(1, Ordering::Relaxed);
        MESSAGES_PUBLISHED
            .with_label_values(&[self.channel.name()])
            .inc();

        trace!(
            channel = %self.channel.name(),
            event = message.event_name().unwrap_or_default(),
            "Message published"
        );

        self.core.dispatcher.dispatch(&self.channel, message);
        Ok(())
    }
}

/// In-process bus with asynchronous, per-subscriber ordered delivery.
///
/// Owns a private worker pool sized by [`BusConfig::worker_threads`].
/// Dropping the bus and every publisher it handed out stops the pool
/// without draining; call [`PubsubBus::shutdown`] to drain first.
pub struct InMemoryPubsubBus {
    core: Arc<BusCore>,
}

impl InMemoryPubsubBus {
    /// Create a bus and start its worker pool.
    pub fn new(config: &BusConfig) -> Result<Self> {
        let dispatcher = Dispatcher::new(config)?;

        info!(
            backend = DEFAULT_BACKEND,
            worker_threads = config.worker_threads,
            "In-memory bus started"
        );

        Ok(Self {
            core: Arc::new(BusCore {
                config: config.clone(),
                lifecycle: Lifecycle::new(),
                channels: ChannelRegistry::new(),
                dispatcher,
                events_published: AtomicU64::new(0),
            }),
        })
    }

    /// Total messages accepted for publishing.
    #[must_use]
    pub fn events_published(&self) -> u64 {
        self.core.events_published.load(Ordering::Relaxed)
    }

    /// Configuration the bus was created with.
    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.core.config
    }
}

impl PubsubBus for InMemoryPubsubBus {
    fn backend_name(&self) -> &str {
        DEFAULT_BACKEND
    }

    fn state(&self) -> BusState {
        self.core.lifecycle.state()
    }

    fn publisher(&self, channel: &str) -> Result<Arc<dyn EventPublisher>> {
        self.core.lifecycle.ensure_active()?;
        Ok(Arc::new(ChannelPublisher {
            channel: self.core.channels.get_or_create(channel),
            core: Arc::clone(&self.core),
        }))
    }

    fn subscribe(
        &self,
        channel: &str,
        subscriber: Arc<dyn Subscriber>,
        principal: Principal,
        filter: Option<EventFilter>,
    ) -> Result<SubscriptionHandle> {
        let core = &self.core;
        core.lifecycle.ensure_active()?;

        let target = core.channels.get_or_create(channel);
        let subscription = Arc::new(Subscription::new(
            core.channels.next_sequence(),
            channel,
            subscriber,
            principal,
            filter,
        ));
        let queue = core.dispatcher.open_lane(Arc::clone(&subscription));
        let handle = core.channels.add_subscription(&target, subscription, queue);

        // Shutdown may have cleared the channels between the check and the insert
        if let Err(e) = core.lifecycle.ensure_active() {
            core.channels.remove_subscription(&handle);
            return Err(e);
        }

        Ok(handle)
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.core.channels.remove_subscription(handle)
    }

    fn shutdown(&self) {
        let core = &self.core;
        if !core.lifecycle.begin_shutdown() {
            debug!("Bus shutdown already requested");
            return;
        }

        info!(backend = DEFAULT_BACKEND, "Bus draining");
        let closed = core.channels.clear();

        if !core.dispatcher.drain(core.config.shutdown_grace) {
            warn!(
                pending_lanes = core.dispatcher.active_lanes(),
                grace_ms = core.config.shutdown_grace.as_millis() as u64,
                "Shutdown grace period elapsed, abandoning pending deliveries"
            );
        }

        core.dispatcher.stop();
        core.lifecycle.finish_shutdown();
        info!(
            subscriptions = closed,
            events_published = core.events_published.load(Ordering::Relaxed),
            "Bus shut down"
        );
    }

    fn subscription_count(&self, channel: &str) -> usize {
        self.core.channels.subscription_count(channel)
    }

    fn channel_names(&self) -> Vec<String> {
        self.core.channels.channel_names()
    }
}
