//! # Bus Registry
//!
//! Resolves bus backends by name. Each backend is instantiated at most once
//! per registry and the instance is reused by every later lookup.
//!
//! ```rust,ignore
//! let registry = BusRegistry::new(BusConfig::from_env());
//! let bus = registry.get_bus()?;
//! bus.publisher("jenkins.job")?.publish(Message::event("job_crud_created"))?;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::bus::PubsubBus;
use crate::config::BusConfig;
use crate::error::{BusError, Result};
use crate::publisher::InMemoryPubsubBus;

/// Name of the built-in in-process backend.
pub const DEFAULT_BACKEND: &str = "in-memory";

/// Constructs a backend from the registry's configuration.
pub type BusFactory = Box<dyn Fn(&BusConfig) -> Result<Arc<dyn PubsubBus>> + Send + Sync>;

/// Name to backend mapping with lazily created, cached instances.
pub struct BusRegistry {
    config: BusConfig,
    factories: BTreeMap<String, BusFactory>,
    instances: Mutex<HashMap<String, Arc<dyn PubsubBus>>>,
}

impl BusRegistry {
    /// Registry with the in-memory backend registered.
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        let mut registry = Self::empty(config);
        registry.register(DEFAULT_BACKEND, |config| {
            let bus: Arc<dyn PubsubBus> = Arc::new(InMemoryPubsubBus::new(config)?);
            Ok(bus)
        });
        registry
    }

    /// Registry configured from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(BusConfig::from_env())
    }

    /// Registry with no backends registered.
    #[must_use]
    pub fn empty(config: BusConfig) -> Self {
        Self {
            config,
            factories: BTreeMap::new(),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Register a backend factory, replacing any factory with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&BusConfig) -> Result<Arc<dyn PubsubBus>> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(backend = %name, "Bus backend registered");
        self.factories.insert(name, Box::new(factory));
        self
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Registered backend names, sorted.
    #[must_use]
    pub fn backends(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// The configured default backend.
    pub fn get_bus(&self) -> Result<Arc<dyn PubsubBus>> {
        self.get_bus_named(&self.config.default_backend)
    }

    /// A backend by name, creating it on first request.
    ///
    /// # Errors
    ///
    /// `BusError::UnknownBackend` if nothing is registered under `name`,
    /// or whatever the backend's factory returns.
    pub fn get_bus_named(&self, name: &str) -> Result<Arc<dyn PubsubBus>> {
        let mut instances = self.instances.lock();
        if let Some(bus) = instances.get(name) {
            return Ok(Arc::clone(bus));
        }

        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| BusError::UnknownBackend {
                name: name.to_string(),
                available: self.backends(),
            })?;

        let bus = factory(&self.config)?;
        info!(backend = name, "Bus backend instantiated");
        instances.insert(name.to_string(), Arc::clone(&bus));
        Ok(bus)
    }

    /// Shut down every instantiated backend.
    pub fn shutdown_all(&self) {
        let buses: Vec<Arc<dyn PubsubBus>> = self.instances.lock().values().cloned().collect();
        for bus in buses {
            bus.shutdown();
        }
    }
}

impl Default for BusRegistry {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl fmt::Debug for BusRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusRegistry")
            .field("config", &self.config)
            .field("backends", &self.backends())
            .field("instances", &self.instances.lock().len())
            .finish()
    }
}
