use grid_domain::CloudProvider;
use serde::Deserialize;
use tracing::warn;

use crate::driver::{Driver, InstanceSpec, ProvisionedOutputs};
use crate::error::DriverError;

/// Static operator configuration for the Proxmox VE driver.
#[derive(Debug, Clone, Deserialize)]
pub struct PveDriverConfig {
    pub endpoint: String,
    pub api_token: String,
    pub node: String,
    pub template: String,
    pub storage: String,
}

pub struct PveDriver {
    pub config: PveDriverConfig,
}

impl PveDriver {
    pub fn new(config: PveDriverConfig) -> Self {
        Self { config }
    }
}

impl Driver for PveDriver {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Pve
    }

    fn render_main(&self, spec: &InstanceSpec) -> Result<String, DriverError> {
        self.validate(spec)?;
        let mut hcl = String::from("# Generated — do not edit\n");
        hcl.push_str("provider \"proxmox\" {\n");
        hcl.push_str(&format!("  pm_api_url          = {:?}\n", self.config.endpoint));
        hcl.push_str("  pm_api_token_id     = \"terraform\"\n");
        hcl.push_str(&format!("  pm_api_token_secret = {:?}\n", self.config.api_token));
        hcl.push_str("}\n\n");
        hcl.push_str("resource \"proxmox_vm_qemu\" \"builder\" {\n");
        hcl.push_str(&format!("  name        = \"grid-{}\"\n", spec.instance_id));
        hcl.push_str(&format!("  target_node = {:?}\n", self.config.node));
        hcl.push_str(&format!("  clone       = {:?}\n", self.config.template));
        hcl.push_str(&format!("  storage     = {:?}\n", self.config.storage));
        hcl.push_str("  cicustom    = \"user=local:snippets/grid-cloud-init.yml\"\n");
        hcl.push_str("}\n\n");
        hcl.push_str("output \"instance_name\" { value = proxmox_vm_qemu.builder.name }\n");
        hcl.push_str("output \"ip_address\" { value = proxmox_vm_qemu.builder.default_ipv4_address }\n");
        hcl.push_str("output \"private_ip\" { value = proxmox_vm_qemu.builder.default_ipv4_address }\n");
        Ok(hcl)
    }

    fn render_firewall(&self, spec: &InstanceSpec) -> Result<String, DriverError> {
        let cidrs = if spec.allowed_cidrs.is_empty() {
            warn!("no allowed_cidrs configured for builder port; defaulting to 0.0.0.0/0");
            vec!["0.0.0.0/0".to_string()]
        } else {
            spec.allowed_cidrs.clone()
        };
        let mut hcl = String::from("resource \"proxmox_virtual_environment_firewall_rules\" \"builder\" {\n");
        hcl.push_str("  rule {\n    type    = \"in\"\n    action  = \"ACCEPT\"\n    dport   = \"22\"\n    source  = \"0.0.0.0/0\"\n  }\n");
        hcl.push_str(&format!(
            "  rule {{\n    type    = \"in\"\n    action  = \"ACCEPT\"\n    dport   = \"{}\"\n    source  = {:?}\n  }}\n",
            spec.builder_port,
            cidrs.join(",")
        ));
        hcl.push_str("}\n");
        Ok(hcl)
    }

    fn render_cloudinit(&self, spec: &InstanceSpec) -> Result<String, DriverError> {
        Ok(crate::cloudinit::render(spec))
    }

    fn validate(&self, _spec: &InstanceSpec) -> Result<(), DriverError> {
        if self.config.endpoint.is_empty() || self.config.api_token.is_empty() {
            return Err(DriverError::Validation(
                "pve driver requires endpoint and api_token".into(),
            ));
        }
        Ok(())
    }

    fn parse_output(&self, raw_output: &str) -> Result<ProvisionedOutputs, DriverError> {
        crate::cloudinit::parse_tf_json_output(raw_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_domain::InstanceId;

    fn spec() -> InstanceSpec {
        InstanceSpec {
            instance_id: InstanceId::new("i1"),
            architecture: "amd64".into(),
            builder_port: 9000,
            callback_url: "http://cp.local/register".into(),
            container_image: "registry/grid-builder:latest".into(),
            package_tree_mirror: None,
            binary_package_host: None,
            swap_gb: 0,
            firewall_enabled: true,
            allowed_cidrs: vec![],
            extra_os_packages: vec![],
            ssh_public_key: "ssh-ed25519 AAAA".into(),
        }
    }

    fn driver() -> PveDriver {
        PveDriver::new(PveDriverConfig {
            endpoint: "https://pve.local:8006/api2/json".into(),
            api_token: "root@pam!grid=secret".into(),
            node: "pve1".into(),
            template: "local:9000/base-cloudimg".into(),
            storage: "local-lvm".into(),
        })
    }

    #[test]
    fn missing_endpoint_fails_validation() {
        let mut driver = driver();
        driver.config.endpoint = String::new();
        assert!(driver.validate(&spec()).is_err());
    }

    #[test]
    fn main_document_includes_node_and_template() {
        let rendered = driver().render_main(&spec()).unwrap();
        assert!(rendered.contains("pve1"));
        assert!(rendered.contains("base-cloudimg"));
    }
}
