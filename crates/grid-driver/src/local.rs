use grid_domain::CloudProvider;
use tracing::debug;

use crate::driver::{Driver, InstanceSpec, ProvisionedOutputs};
use crate::error::DriverError;

/// A stub driver that simulates infrastructure locally: produces synthetic
/// rendered documents and a synthetic `parse_output`, performs no I/O. The
/// default driver `grid-cli bootstrap --cloud local` wires up.
#[derive(Debug, Default, Clone)]
pub struct LocalDriver;

impl LocalDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for LocalDriver {
    fn provider(&self) -> CloudProvider {
        // Reuses Aws as the provider tag has no "local" variant; grid-cli
        // never registers LocalDriver under a real provider key, it is
        // looked up directly by callers that want the stub.
        CloudProvider::Aws
    }

    fn render_main(&self, spec: &InstanceSpec) -> Result<String, DriverError> {
        debug!(instance_id = %spec.instance_id, "LocalDriver: render_main");
        Ok(format!("# local main for {}\n", spec.instance_id))
    }

    fn render_firewall(&self, spec: &InstanceSpec) -> Result<String, DriverError> {
        debug!(instance_id = %spec.instance_id, "LocalDriver: render_firewall");
        Ok(format!("# local firewall for {}\n", spec.instance_id))
    }

    fn render_cloudinit(&self, spec: &InstanceSpec) -> Result<String, DriverError> {
        debug!(instance_id = %spec.instance_id, "LocalDriver: render_cloudinit");
        Ok(format!("#!/bin/sh\n# local cloud-init for {}\n", spec.instance_id))
    }

    fn validate(&self, _spec: &InstanceSpec) -> Result<(), DriverError> {
        Ok(())
    }

    fn parse_output(&self, _raw_output: &str) -> Result<ProvisionedOutputs, DriverError> {
        Ok(ProvisionedOutputs {
            instance_name: "local-instance".into(),
            ip_address: "127.0.0.1".into(),
            private_ip: Some("127.0.0.1".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_domain::InstanceId;

    fn sample_spec() -> InstanceSpec {
        InstanceSpec {
            instance_id: InstanceId::new("i1"),
            architecture: "amd64".into(),
            builder_port: 9000,
            callback_url: "http://control-plane.local/api/v1/builders/register".into(),
            container_image: "registry.example/grid-builder:latest".into(),
            package_tree_mirror: None,
            binary_package_host: None,
            swap_gb: 0,
            firewall_enabled: true,
            allowed_cidrs: vec![],
            extra_os_packages: vec![],
            ssh_public_key: "ssh-ed25519 AAAA".into(),
        }
    }

    #[test]
    fn renders_without_io() {
        let driver = LocalDriver::new();
        let spec = sample_spec();
        assert!(driver.render_main(&spec).unwrap().contains("i1"));
        assert!(driver.render_firewall(&spec).unwrap().contains("i1"));
        assert!(driver.render_cloudinit(&spec).unwrap().starts_with("#!/bin/sh"));
    }

    #[test]
    fn parse_output_is_synthetic() {
        let driver = LocalDriver::new();
        let outputs = driver.parse_output("").unwrap();
        assert_eq!(outputs.ip_address, "127.0.0.1");
    }
}
