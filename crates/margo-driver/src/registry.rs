use std::collections::HashMap;
use std::sync::Arc;

use margo_domain::DriverKind;

use crate::driver::Driver;
use crate::error::DriverError;

/// Dispatches to the right [`Driver`] implementation for a manifest's
/// `driver_kind`. Exactly one driver should be registered per kind.
pub struct DriverRegistry {
    drivers: HashMap<DriverKind, Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self { drivers: HashMap::new() }
    }

    pub fn register(&mut self, kind: DriverKind, driver: Arc<dyn Driver>) -> &mut Self {
        self.drivers.insert(kind, driver);
        self
    }

    pub fn for_kind(&self, kind: DriverKind) -> Result<Arc<dyn Driver>, DriverError> {
        self.drivers.get(&kind).cloned().ok_or(DriverError::DriverNotConfigured(kind))
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalDriver;

    #[test]
    fn unregistered_kind_errors() {
        let registry = DriverRegistry::new();
        assert!(matches!(registry.for_kind(DriverKind::Helm), Err(DriverError::DriverNotConfigured(DriverKind::Helm))));
    }

    #[test]
    fn registered_kind_resolves() {
        let mut registry = DriverRegistry::new();
        registry.register(DriverKind::Helm, Arc::new(LocalDriver::new(DriverKind::Helm)));
        assert!(registry.for_kind(DriverKind::Helm).is_ok());
    }
}
