use grid_domain::CloudProvider;
use serde::Deserialize;
use tracing::warn;

use crate::driver::{Driver, InstanceSpec, ProvisionedOutputs};
use crate::error::DriverError;

/// Static operator configuration for the GCE driver.
#[derive(Debug, Clone, Deserialize)]
pub struct GcpDriverConfig {
    pub project: String,
    pub region: String,
    pub zone: String,
    pub machine_type: String,
    pub image_family: String,
    pub network: String,
}

pub struct GcpDriver {
    pub config: GcpDriverConfig,
}

impl GcpDriver {
    pub fn new(config: GcpDriverConfig) -> Self {
        Self { config }
    }
}

impl Driver for GcpDriver {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Gcp
    }

    fn render_main(&self, spec: &InstanceSpec) -> Result<String, DriverError> {
        self.validate(spec)?;
        let mut hcl = String::from("# Generated — do not edit\n");
        hcl.push_str("provider \"google\" {\n");
        hcl.push_str(&format!("  project = {:?}\n", self.config.project));
        hcl.push_str(&format!("  region  = {:?}\n", self.config.region));
        hcl.push_str("}\n\n");
        hcl.push_str("resource \"google_compute_instance\" \"builder\" {\n");
        hcl.push_str(&format!("  name         = \"grid-{}\"\n", spec.instance_id));
        hcl.push_str(&format!("  machine_type = {:?}\n", self.config.machine_type));
        hcl.push_str(&format!("  zone         = {:?}\n", self.config.zone));
        hcl.push_str("  boot_disk {\n    initialize_params {\n");
        hcl.push_str(&format!("      image = {:?}\n", self.config.image_family));
        hcl.push_str("    }\n  }\n");
        hcl.push_str(&format!("  network_interface {{\n    network = {:?}\n    access_config {{}}\n  }}\n", self.config.network));
        hcl.push_str("  metadata_startup_script = file(\"cloud-init.sh\")\n");
        hcl.push_str(&format!(
            "  metadata = {{ ssh-keys = \"grid:{}\" }}\n",
            spec.ssh_public_key
        ));
        hcl.push_str("}\n\n");
        hcl.push_str("output \"instance_name\" { value = google_compute_instance.builder.name }\n");
        hcl.push_str("output \"ip_address\" { value = google_compute_instance.builder.network_interface[0].access_config[0].nat_ip }\n");
        hcl.push_str("output \"private_ip\" { value = google_compute_instance.builder.network_interface[0].network_ip }\n");
        Ok(hcl)
    }

    fn render_firewall(&self, spec: &InstanceSpec) -> Result<String, DriverError> {
        let cidrs = if spec.allowed_cidrs.is_empty() {
            warn!("no allowed_cidrs configured for builder port; defaulting to 0.0.0.0/0");
            vec!["0.0.0.0/0".to_string()]
        } else {
            spec.allowed_cidrs.clone()
        };
        let mut hcl = String::from("resource \"google_compute_firewall\" \"builder_ssh\" {\n");
        hcl.push_str(&format!("  network = {:?}\n", self.config.network));
        hcl.push_str("  allow { protocol = \"tcp\" ports = [\"22\"] }\n");
        hcl.push_str("  source_ranges = [\"0.0.0.0/0\"]\n}\n\n");
        hcl.push_str("resource \"google_compute_firewall\" \"builder_port\" {\n");
        hcl.push_str(&format!("  network = {:?}\n", self.config.network));
        hcl.push_str(&format!(
            "  allow {{ protocol = \"tcp\" ports = [{:?}] }}\n",
            spec.builder_port.to_string()
        ));
        hcl.push_str(&format!("  source_ranges = {:?}\n}}\n", cidrs));
        Ok(hcl)
    }

    fn render_cloudinit(&self, spec: &InstanceSpec) -> Result<String, DriverError> {
        Ok(crate::cloudinit::render(spec))
    }

    fn validate(&self, _spec: &InstanceSpec) -> Result<(), DriverError> {
        if self.config.project.is_empty() || self.config.region.is_empty() || self.config.zone.is_empty() {
            return Err(DriverError::Validation(
                "gcp driver requires project, region, and zone".into(),
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

    fn driver() -> GcpDriver {
        GcpDriver::new(GcpDriverConfig {
            project: "grid-prod".into(),
            region: "us-central1".into(),
            zone: "us-central1-a".into(),
            machine_type: "e2-standard-2".into(),
            image_family: "debian-12".into(),
            network: "default".into(),
        })
    }

    #[test]
    fn missing_zone_fails_validation() {
        let mut driver = driver();
        driver.config.zone = String::new();
        assert!(driver.validate(&spec()).is_err());
    }

    #[test]
    fn main_document_references_instance_id() {
        let rendered = driver().render_main(&spec()).unwrap();
        assert!(rendered.contains("grid-i1"));
    }
}
