//! # Dispatcher
//!
//! Asynchronous delivery of published messages.
//!
//! Every subscription owns a delivery lane: an unbounded FIFO queue drained
//! by one task on the bus's private runtime. The lane hands each message to
//! the blocking pool and waits for the callback before taking the next one,
//! so a subscriber sees messages in publish order while slow or panicking
//! subscribers never hold up the publisher or each other.
//!
//! For each queued message a lane runs, in order:
//!
//! 1. the subscription's filter,
//! 2. the subject's read check against the subscription's principal,
//! 3. a subject-free copy of the message handed to the subscriber.

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use pubsub_telemetry::metrics::outcome;
use pubsub_telemetry::{time_histogram, DELIVERIES, DELIVERY_DURATION};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::channel::{Channel, Subscription};
use crate::config::BusConfig;
use crate::error::{BusError, Result};
use crate::filter::matches_optional;
use crate::message::Message;

/// Sending half of a subscription's delivery lane.
pub(crate) type DeliveryQueue = mpsc::UnboundedSender<Arc<Message>>;

/// What happened to one message at one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Subscriber received the message and returned normally
    Delivered,
    /// Filter rejected the message
    Filtered,
    /// Subject refused read access to the subscription's principal
    Denied,
    /// Subscriber returned an error or panicked
    Failed,
}

impl DeliveryOutcome {
    /// Metric label for this outcome.
    #[must_use]
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Delivered => outcome::DELIVERED,
            Self::Filtered => outcome::FILTERED,
            Self::Denied => outcome::DENIED,
            Self::Failed => outcome::FAILED,
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Run one message through one subscription.
///
/// Blocking: calls the subscriber on the current thread.
pub(crate) fn deliver(subscription: &Subscription, message: &Message) -> DeliveryOutcome {
    let _timer = time_histogram!(DELIVERY_DURATION);

    if !matches_optional(subscription.filter(), message) {
        return DeliveryOutcome::Filtered;
    }

    if let Some(subject) = message.subject() {
        if !subject.can_read(subscription.principal()) {
            trace!(
                channel = %subscription.channel(),
                subscription = %subscription.id(),
                principal = %subscription.principal(),
                "Delivery denied"
            );
            return DeliveryOutcome::Denied;
        }
    }

    match subscription
        .subscriber()
        .on_message(message.clone_without_subject())
    {
        Ok(()) => DeliveryOutcome::Delivered,
        Err(e) => {
            warn!(
                channel = %subscription.channel(),
                subscription = %subscription.id(),
                event = message.event_name().unwrap_or_default(),
                error = %e,
                "Subscriber failed to handle message"
            );
            DeliveryOutcome::Failed
        }
    }
}

thread_local! {
    /// Tracker of the dispatcher whose callback is running on this thread.
    static DELIVERING_FOR: Cell<usize> = const { Cell::new(0) };
}

/// Marks the current thread as running a callback for one dispatcher.
struct DeliveryScope {
    previous: usize,
}

impl DeliveryScope {
    fn enter(lanes: usize) -> Self {
        Self {
            previous: DELIVERING_FOR.with(|c| c.replace(lanes)),
        }
    }
}

impl Drop for DeliveryScope {
    fn drop(&mut self) {
        DELIVERING_FOR.with(|c| c.set(self.previous));
    }
}

/// Counts running lanes so shutdown can wait for them.
#[derive(Default)]
struct LaneTracker {
    active: Mutex<usize>,
    idle: Condvar,
}

impl LaneTracker {
    fn enter(self: &Arc<Self>) -> LaneGuard {
        *self.active.lock() += 1;
        LaneGuard(Arc::clone(self))
    }

    fn active(&self) -> usize {
        *self.active.lock()
    }

    /// Wait until at most `floor` lanes are running. Returns `false` on timeout.
    fn wait_idle(&self, floor: usize, timeout: Duration) -> bool {
        let mut active = self.active.lock();
        if *active <= floor {
            return true;
        }
        let result = self.idle.wait_while_for(&mut active, |n| *n > floor, timeout);
        !result.timed_out()
    }

    fn key(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }
}

/// Marks a lane as finished when dropped, including on cancellation.
struct LaneGuard(Arc<LaneTracker>);

impl Drop for LaneGuard {
    fn drop(&mut self) {
        let mut active = self.0.active.lock();
        *active = active.saturating_sub(1);
        self.0.idle.notify_all();
    }
}

/// Owns the delivery runtime and the lanes running on it.
pub struct Dispatcher {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    lanes: Arc<LaneTracker>,
}

impl Dispatcher {
    /// Build a dispatcher with its own multi-threaded runtime.
    pub fn new(config: &BusConfig) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name(config.thread_name.clone())
            .enable_time()
            .build()
            .map_err(|e| BusError::RuntimeInit(e.to_string()))?;

        debug!(
            worker_threads = config.worker_threads,
            thread_name = %config.thread_name,
            "Dispatcher runtime started"
        );

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            lanes: Arc::new(LaneTracker::default()),
        })
    }

    /// Start the delivery lane for a subscription.
    ///
    /// The lane runs until every sender for the returned queue is dropped
    /// and the queue is empty.
    pub(crate) fn open_lane(&self, subscription: Arc<Subscription>) -> DeliveryQueue {
        let (queue, receiver) = mpsc::unbounded_channel();
        let guard = self.lanes.enter();
        self.handle.spawn(run_lane(subscription, receiver, guard));
        queue
    }

    /// Enqueue a message for every subscription on the channel.
    ///
    /// The subscription set is snapshotted first, so subscriptions added
    /// during the call do not receive the message. Returns the number of
    /// lanes the message was queued on.
    pub(crate) fn dispatch(&self, channel: &Channel, message: Message) -> usize {
        let message = Arc::new(message);
        let mut queued = 0;

        for entry in channel.snapshot() {
            if entry.queue.send(Arc::clone(&message)).is_ok() {
                queued += 1;
            } else {
                debug!(
                    channel = %channel.name(),
                    subscription = %entry.subscription.id(),
                    "Lane closed, message dropped"
                );
            }
        }

        queued
    }

    /// Number of lanes still running.
    #[must_use]
    pub fn active_lanes(&self) -> usize {
        self.lanes.active()
    }

    /// Wait for running lanes to empty their queues.
    ///
    /// Callers close the lanes first by dropping their queues. Returns
    /// `false` if lanes were still running when `grace` elapsed.
    ///
    /// Called from inside one of this dispatcher's callbacks, the calling
    /// lane cannot finish until the callback returns, so it is not waited for.
    pub fn drain(&self, grace: Duration) -> bool {
        let floor = usize::from(self.in_own_callback());
        if floor > 0 {
            debug!("Draining from a subscriber callback, not waiting for its lane");
        }
        self.lanes.wait_idle(floor, grace)
    }

    /// Whether the current thread is running a callback for this dispatcher.
    #[must_use]
    pub fn in_own_callback(&self) -> bool {
        DELIVERING_FOR.with(Cell::get) == self.lanes.key()
    }

    /// Stop the runtime without waiting. Lanes still running are cancelled.
    pub fn stop(&self) {
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
            debug!("Dispatcher runtime stopped");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_lane(
    subscription: Arc<Subscription>,
    mut receiver: mpsc::UnboundedReceiver<Arc<Message>>,
    guard: LaneGuard,
) {
    trace!(subscription = %subscription.id(), "Delivery lane started");
    let lanes = guard.0.key();

    while let Some(message) = receiver.recv().await {
        let target = Arc::clone(&subscription);
        let delivery = move || {
            let _scope = DeliveryScope::enter(lanes);
            deliver(&target, &message)
        };
        let outcome = match tokio::task::spawn_blocking(delivery).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    channel = %subscription.channel(),
                    subscription = %subscription.id(),
                    error = %e,
                    "Subscriber panicked during delivery"
                );
                DeliveryOutcome::Failed
            }
        };

        DELIVERIES.with_label_values(&[outcome.as_label()]).inc();
    }

    trace!(subscription = %subscription.id(), "Delivery lane closed");
}
