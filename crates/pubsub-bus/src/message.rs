//! # Bus Messages
//!
//! A [`Message`] is a bag of string properties plus an optional [`Subject`].
//! The subject is the live domain object the message is about; it is used
//! for the per-subscriber read check and is never handed to a subscriber.
//! Subscribers always receive a [`Message::clone_without_subject`] copy.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::error::{BusError, Result};
use crate::filter::EventFilter;
use crate::security::Subject;

/// Well-known property keys.
pub struct EventProps;

impl EventProps {
    /// Channel the message was published on.
    pub const CHANNEL_NAME: &'static str = "channel_name";
    /// Event name.
    pub const EVENT_NAME: &'static str = "event_name";
    /// Unique id assigned at publish time.
    pub const EVENT_UUID: &'static str = "event_uuid";
    /// Publish time in epoch milliseconds.
    pub const EVENT_TIMESTAMP: &'static str = "event_timestamp";
}

/// A value that can be stored as a message property.
///
/// Every property is stored as a string; implementors define the coercion
/// and reject values with no faithful string form.
pub trait PropertyValue {
    /// Convert to the stored string form, or explain why it cannot be.
    fn to_property(&self) -> std::result::Result<String, String>;
}

impl PropertyValue for str {
    fn to_property(&self) -> std::result::Result<String, String> {
        Ok(self.to_string())
    }
}

impl PropertyValue for String {
    fn to_property(&self) -> std::result::Result<String, String> {
        Ok(self.clone())
    }
}

impl PropertyValue for char {
    fn to_property(&self) -> std::result::Result<String, String> {
        Ok(self.to_string())
    }
}

impl PropertyValue for bool {
    fn to_property(&self) -> std::result::Result<String, String> {
        Ok(self.to_string())
    }
}

impl PropertyValue for Uuid {
    fn to_property(&self) -> std::result::Result<String, String> {
        Ok(self.to_string())
    }
}

macro_rules! integer_property {
    ($($t:ty),*) => {
        $(
            impl PropertyValue for $t {
                fn to_property(&self) -> std::result::Result<String, String> {
                    Ok(self.to_string())
                }
            }
        )*
    };
}

integer_property!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

macro_rules! float_property {
    ($($t:ty),*) => {
        $(
            impl PropertyValue for $t {
                fn to_property(&self) -> std::result::Result<String, String> {
                    if self.is_finite() {
                        Ok(self.to_string())
                    } else {
                        Err(format!("non-finite number {self} has no string form"))
                    }
                }
            }
        )*
    };
}

float_property!(f32, f64);

impl<T: PropertyValue + ?Sized> PropertyValue for &T {
    fn to_property(&self) -> std::result::Result<String, String> {
        (**self).to_property()
    }
}

/// Validate and coerce one (key, value) pair.
pub(crate) fn property_pair<V: PropertyValue + ?Sized>(
    key: &str,
    value: &V,
) -> Result<(String, String)> {
    if key.trim().is_empty() {
        return Err(BusError::invalid_property(key, "key must not be empty"));
    }
    let value = value
        .to_property()
        .map_err(|reason| BusError::invalid_property(key, reason))?;
    Ok((key.to_string(), value))
}

/// A message published on the bus.
#[derive(Default)]
pub struct Message {
    properties: BTreeMap<String, String>,
    subject: Option<Arc<dyn Subject>>,
}

impl Message {
    /// Create an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a message for the given event name.
    pub fn event(name: impl Into<String>) -> Self {
        let mut message = Self::new();
        message
            .properties
            .insert(EventProps::EVENT_NAME.to_string(), name.into());
        message
    }

    /// Set a property, replacing any previous value.
    ///
    /// # Errors
    ///
    /// `BusError::InvalidProperty` if the key is blank or the value has no
    /// string form.
    pub fn set<V: PropertyValue + ?Sized>(&mut self, key: &str, value: &V) -> Result<&mut Self> {
        let (key, value) = property_pair(key, value)?;
        self.properties.insert(key, value);
        Ok(self)
    }

    /// Builder form of [`Message::set`].
    pub fn with<V: PropertyValue + ?Sized>(mut self, key: &str, value: &V) -> Result<Self> {
        self.set(key, value)?;
        Ok(self)
    }

    /// Copy every property of `other` into this message.
    pub fn put_all<'a, I>(&mut self, other: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (key, value) in other {
            self.set(key, value)?;
        }
        Ok(self)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.properties.remove(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        self.get(EventProps::EVENT_NAME)
    }

    pub fn set_event_name(&mut self, name: &str) -> Result<&mut Self> {
        self.set(EventProps::EVENT_NAME, name)
    }

    #[must_use]
    pub fn channel_name(&self) -> Option<&str> {
        self.get(EventProps::CHANNEL_NAME)
    }

    pub fn set_channel_name(&mut self, channel: &str) -> Result<&mut Self> {
        self.set(EventProps::CHANNEL_NAME, channel)
    }

    /// Id assigned when the message was published.
    #[must_use]
    pub fn event_uuid(&self) -> Option<Uuid> {
        self.get(EventProps::EVENT_UUID)
            .and_then(|v| Uuid::parse_str(v).ok())
    }

    /// Publish time in epoch milliseconds.
    #[must_use]
    pub fn timestamp(&self) -> Option<i64> {
        self.get(EventProps::EVENT_TIMESTAMP)
            .and_then(|v| v.parse().ok())
    }

    /// Attach the domain object this message is about.
    #[must_use]
    pub fn with_subject(mut self, subject: Arc<dyn Subject>) -> Self {
        self.subject = Some(subject);
        self
    }

    #[must_use]
    pub fn subject(&self) -> Option<&dyn Subject> {
        self.subject.as_deref()
    }

    #[must_use]
    pub fn has_subject(&self) -> bool {
        self.subject.is_some()
    }

    /// Copy of the property bag with no subject reference.
    ///
    /// The copy owns its own storage; mutating either side never affects
    /// the other.
    #[must_use]
    pub fn clone_without_subject(&self) -> Self {
        Self {
            properties: self.properties.clone(),
            subject: None,
        }
    }

    /// Whether every pair required by `filter` is present with an equal value.
    #[must_use]
    pub fn matches(&self, filter: &EventFilter) -> bool {
        filter.matches(self)
    }

    /// Serialize the property bag as a JSON object. The subject is never
    /// serialized.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| BusError::Json(e.to_string()))
    }

    /// Build a message from a JSON object of scalar values.
    ///
    /// # Errors
    ///
    /// `BusError::Json` if the input is not a JSON object,
    /// `BusError::InvalidProperty` if a value is not a scalar.
    pub fn from_json(json: &str) -> Result<Self> {
        let object: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(json).map_err(|e| BusError::Json(e.to_string()))?;

        let mut message = Self::new();
        for (key, value) in object {
            match value {
                serde_json::Value::String(s) => message.set(&key, &s)?,
                serde_json::Value::Bool(b) => message.set(&key, &b)?,
                serde_json::Value::Number(n) => message.set(&key, &n.to_string())?,
                other => {
                    return Err(BusError::invalid_property(
                        &key,
                        format!("expected a scalar, found {other}"),
                    ))
                }
            };
        }
        Ok(message)
    }

    /// Assign channel, id and timestamp as the message is accepted.
    pub(crate) fn stamp(&mut self, channel: &str) {
        self.properties
            .insert(EventProps::CHANNEL_NAME.to_string(), channel.to_string());
        self.properties
            .entry(EventProps::EVENT_UUID.to_string())
            .or_insert_with(|| Uuid::new_v4().to_string());
        self.properties
            .entry(EventProps::EVENT_TIMESTAMP.to_string())
            .or_insert_with(|| chrono::Utc::now().timestamp_millis().to_string());
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.properties.serialize(serializer)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("properties", &self.properties)
            .field("has_subject", &self.has_subject())
            .finish()
    }
}
