//! # Delivery Authorization
//!
//! A subscription is bound to a [`Principal`] captured at subscribe time.
//! A message may carry a [`Subject`], the domain object it is about. Before
//! each delivery the dispatcher asks the subject whether the subscription's
//! principal may read it. The bus never implements that decision itself.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of the unauthenticated principal.
pub const ANONYMOUS: &str = "anonymous";

/// Name of the all-powerful system principal.
pub const SYSTEM: &str = "SYSTEM";

/// Identity a subscription is authorized as.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    name: String,
    authorities: BTreeSet<String>,
}

impl Principal {
    /// Create a principal with no granted authorities.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authorities: BTreeSet::new(),
        }
    }

    /// The unauthenticated principal.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS)
    }

    /// The system principal.
    #[must_use]
    pub fn system() -> Self {
        Self::new(SYSTEM)
    }

    /// Grant an authority (role, group) to this principal.
    #[must_use]
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authorities.insert(authority.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn authorities(&self) -> impl Iterator<Item = &str> {
        self.authorities.iter().map(String::as_str)
    }

    #[must_use]
    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.contains(authority)
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.name == ANONYMOUS
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        self.name == SYSTEM
    }
}

impl Default for Principal {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Domain object that can answer a read-permission check.
///
/// Attach one to a message with `Message::with_subject`. The subject stays
/// with the publisher's message and is stripped from every delivered copy.
pub trait Subject: Send + Sync {
    /// Whether `principal` may see messages about this object.
    fn can_read(&self, principal: &Principal) -> bool;
}

impl<F> Subject for F
where
    F: Fn(&Principal) -> bool + Send + Sync,
{
    fn can_read(&self, principal: &Principal) -> bool {
        self(principal)
    }
}
