//! # Pubsub Bus - Authorization-Aware In-Process Messaging
//!
//! Components publish property-bag messages to named channels. Subscribers
//! register a callback, the principal they act as, and an optional filter.
//! Delivery is asynchronous and happens on a private worker pool.
//!
//! ## Delivery Pipeline
//!
//! ```text
//! ┌────────────┐  publish()   ┌──────────┐  snapshot   ┌───────────────┐
//! │ Publisher  │ ───────────► │ Channel  │ ──────────► │ Delivery lane │
//! └────────────┘  (returns)   └──────────┘  per sub    └───────┬───────┘
//!                                                              │
//!                      filter ─► subject.can_read(principal) ─►┤
//!                                                              ▼
//!                                                   subscriber.on_message(copy)
//! ```
//!
//! ## Guarantees
//!
//! - **Ordering:** one subscriber sees one channel's messages in publish order
//! - **Isolation:** a failing or panicking subscriber affects no one else
//! - **Authorization:** a denied message is skipped silently
//! - **Subject stripping:** delivered copies never carry the subject

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bus;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod message;
pub mod publisher;
pub mod registry;
pub mod security;
pub mod subscriber;

// Re-export main types
pub use bus::{BusState, EventPublisher, PubsubBus};
pub use channel::{Channel, ChannelRegistry, Subscription, SubscriptionHandle};
pub use config::{BusConfig, DEFAULT_SHUTDOWN_GRACE};
pub use dispatcher::DeliveryOutcome;
pub use error::{BusError, DeliveryError, Result};
pub use filter::{matches_optional, EventFilter};
pub use message::{EventProps, Message, PropertyValue};
pub use publisher::{ChannelPublisher, InMemoryPubsubBus};
pub use registry::{BusFactory, BusRegistry, DEFAULT_BACKEND};
pub use security::{Principal, Subject};
pub use subscriber::{subscribe_stream, EventStream, Subscriber, SubscriptionError};

