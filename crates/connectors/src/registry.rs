//! Service-type registry for connector construction.

use std::collections::HashMap;
use std::sync::Arc;

use crate::connector::Connector;
use crate::shipstream::ShipStreamConnector;
use crate::warepoint::WarePointConnector;

/// Factory producing a bare connector instance.
pub type ConnectorFactory = Box<dyn Fn() -> Arc<dyn Connector> + Send + Sync>;

/// Registry mapping service-type tags to connector factories.
///
/// Shared read-only across concurrent workflow runs; each run gets fresh
/// connector instances from the factories.
pub struct ConnectorRegistry {
    factories: HashMap<String, ConnectorFactory>,
}

impl ConnectorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { factories: HashMap::new() }
    }

    /// Create a registry with the built-in connectors registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("shipstream", || Arc::new(ShipStreamConnector::new()));
        registry.register("warepoint", || Arc::new(WarePointConnector::new()));
        registry
    }

    /// Register a factory under a service-type tag.
    pub fn register<F>(&mut self, service_type: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Connector> + Send + Sync + 'static,
    {
        self.factories.insert(service_type.into(), Box::new(factory));
    }

    /// Returns true if a factory is registered for the service type.
    pub fn has(&self, service_type: &str) -> bool {
        self.factories.contains_key(service_type)
    }

    /// Registered service-type tags.
    pub fn service_types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Construct a connector for the service type, if registered.
    pub fn create(&self, service_type: &str) -> Option<Arc<dyn Connector>> {
        self.factories.get(service_type).map(|factory| factory())
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
