//! # Event Filters
//!
//! Conjunctive equality filters over message properties.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::{property_pair, EventProps, Message, PropertyValue};

/// Filter for narrowing which messages reach a subscription.
///
/// A message matches when every required pair is present in the message
/// with an equal value. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventFilter {
    required: BTreeMap<String, String>,
}

impl EventFilter {
    /// Create a filter that accepts all messages.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a filter for a single event name.
    pub fn for_event(name: impl Into<String>) -> Self {
        let mut required = BTreeMap::new();
        required.insert(EventProps::EVENT_NAME.to_string(), name.into());
        Self { required }
    }

    /// Require `key` to equal `value`.
    ///
    /// Values are validated and coerced the same way as message properties.
    pub fn set<V: PropertyValue + ?Sized>(&mut self, key: &str, value: &V) -> Result<&mut Self> {
        let (key, value) = property_pair(key, value)?;
        self.required.insert(key, value);
        Ok(self)
    }

    /// Builder form of [`EventFilter::set`].
    pub fn with<V: PropertyValue + ?Sized>(mut self, key: &str, value: &V) -> Result<Self> {
        self.set(key, value)?;
        Ok(self)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.required.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.required.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Check if a message matches this filter.
    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        self.required
            .iter()
            .all(|(key, expected)| message.get(key) == Some(expected.as_str()))
    }
}

/// Evaluate an optional filter; no filter matches everything.
#[must_use]
pub fn matches_optional(filter: Option<&EventFilter>, message: &Message) -> bool {
    filter.map_or(true, |f| f.matches(message))
}
