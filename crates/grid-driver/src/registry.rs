use std::collections::HashMap;
use std::sync::Arc;

use grid_domain::CloudProvider;

use crate::driver::Driver;
use crate::error::DriverError;

/// Dispatches to the [`Driver`] registered for a given [`CloudProvider`].
pub struct DriverRegistry {
    drivers: HashMap<CloudProvider, Arc<dyn Driver>>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.insert(driver.provider(), driver);
    }

    pub fn for_provider(&self, provider: CloudProvider) -> Result<Arc<dyn Driver>, DriverError> {
        self.drivers
            .get(&provider)
            .cloned()
            .ok_or(DriverError::NotConfigured(provider))
    }

    pub fn configured_providers(&self) -> Vec<CloudProvider> {
        self.drivers.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{InstanceSpec, ProvisionedOutputs};

    struct StubDriver(CloudProvider);

    #[async_trait::async_trait]
    impl Driver for StubDriver {
        fn provider(&self) -> CloudProvider {
            self.0
        }
        fn render_main(&self, _spec: &InstanceSpec) -> Result<String, DriverError> {
            Ok(String::new())
        }
        fn render_firewall(&self, _spec: &InstanceSpec) -> Result<String, DriverError> {
            Ok(String::new())
        }
        fn render_cloudinit(&self, _spec: &InstanceSpec) -> Result<String, DriverError> {
            Ok(String::new())
        }
        fn validate(&self, _spec: &InstanceSpec) -> Result<(), DriverError> {
            Ok(())
        }
        fn parse_output(&self, _raw_output: &str) -> Result<ProvisionedOutputs, DriverError> {
            Ok(ProvisionedOutputs {
                instance_name: "x".into(),
                ip_address: "0.0.0.0".into(),
                private_ip: None,
            })
        }
    }

    #[test]
    fn unregistered_provider_errors() {
        let registry = DriverRegistry::new();
        assert!(matches!(
            registry.for_provider(CloudProvider::Aws),
            Err(DriverError::NotConfigured(CloudProvider::Aws))
        ));
    }

    #[test]
    fn register_and_resolve() {
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(StubDriver(CloudProvider::Gcp)));
        assert!(registry.for_provider(CloudProvider::Gcp).is_ok());
        assert_eq!(registry.configured_providers(), vec![CloudProvider::Gcp]);
    }
}
