use grid_domain::CloudProvider;
use serde::Deserialize;
use tracing::warn;

use crate::driver::{Driver, InstanceSpec, ProvisionedOutputs};
use crate::error::DriverError;

/// Static operator configuration for the Alibaba Cloud (ECS) driver.
#[derive(Debug, Clone, Deserialize)]
pub struct AliyunDriverConfig {
    pub region: String,
    pub image_id: String,
    pub instance_type: String,
    pub vswitch_id: String,
}

pub struct AliyunDriver {
    pub config: AliyunDriverConfig,
}

impl AliyunDriver {
    pub fn new(config: AliyunDriverConfig) -> Self {
        Self { config }
    }
}

impl Driver for AliyunDriver {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Aliyun
    }

    fn render_main(&self, spec: &InstanceSpec) -> Result<String, DriverError> {
        self.validate(spec)?;
        let mut hcl = String::from("# Generated — do not edit\n");
        hcl.push_str("provider \"alicloud\" {\n");
        hcl.push_str(&format!("  region = {:?}\n", self.config.region));
        hcl.push_str("}\n\n");
        hcl.push_str("resource \"alicloud_instance\" \"builder\" {\n");
        hcl.push_str(&format!("  image_id          = {:?}\n", self.config.image_id));
        hcl.push_str(&format!("  instance_type     = {:?}\n", self.config.instance_type));
        hcl.push_str(&format!("  vswitch_id        = {:?}\n", self.config.vswitch_id));
        hcl.push_str(&format!("  instance_name     = \"grid-{}\"\n", spec.instance_id));
        hcl.push_str("  security_groups   = [alicloud_security_group.builder.id]\n");
        hcl.push_str("  user_data         = filebase64(\"cloud-init.sh\")\n");
        hcl.push_str("}\n\n");
        hcl.push_str("output \"instance_name\" { value = alicloud_instance.builder.instance_name }\n");
        hcl.push_str("output \"ip_address\" { value = alicloud_instance.builder.public_ip }\n");
        hcl.push_str("output \"private_ip\" { value = alicloud_instance.builder.private_ip }\n");
        Ok(hcl)
    }

    fn render_firewall(&self, spec: &InstanceSpec) -> Result<String, DriverError> {
        let cidrs = if spec.allowed_cidrs.is_empty() {
            warn!("no allowed_cidrs configured for builder port; defaulting to 0.0.0.0/0");
            vec!["0.0.0.0/0".to_string()]
        } else {
            spec.allowed_cidrs.clone()
        };
        let mut hcl = String::from("resource \"alicloud_security_group\" \"builder\" {}\n\n");
        hcl.push_str("resource \"alicloud_security_group_rule\" \"ssh\" {\n");
        hcl.push_str("  type = \"ingress\"\n  ip_protocol = \"tcp\"\n  port_range = \"22/22\"\n");
        hcl.push_str("  cidr_ip = \"0.0.0.0/0\"\n  security_group_id = alicloud_security_group.builder.id\n}\n\n");
        hcl.push_str("resource \"alicloud_security_group_rule\" \"builder_port\" {\n");
        hcl.push_str("  type = \"ingress\"\n  ip_protocol = \"tcp\"\n");
        hcl.push_str(&format!(
            "  port_range = \"{0}/{0}\"\n",
            spec.builder_port
        ));
        hcl.push_str(&format!("  cidr_ip = {:?}\n", cidrs.first().cloned().unwrap_or_default()));
        hcl.push_str("  security_group_id = alicloud_security_group.builder.id\n}\n");
        Ok(hcl)
    }

    fn render_cloudinit(&self, spec: &InstanceSpec) -> Result<String, DriverError> {
        Ok(crate::cloudinit::render(spec))
    }

    fn validate(&self, _spec: &InstanceSpec) -> Result<(), DriverError> {
        if self.config.region.is_empty() || self.config.image_id.is_empty() {
            return Err(DriverError::Validation(
                "aliyun driver requires region and image_id".into(),
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
            architecture: "arm64".into(),
            builder_port: 9000,
            callback_url: "http://cp.local/register".into(),
            container_image: "registry/grid-builder:latest".into(),
            package_tree_mirror: None,
            binary_package_host: None,
            swap_gb: 0,
            firewall_enabled: true,
            allowed_cidrs: vec!["10.0.0.0/8".into()],
            extra_os_packages: vec![],
            ssh_public_key: "ssh-ed25519 AAAA".into(),
        }
    }

    fn driver() -> AliyunDriver {
        AliyunDriver::new(AliyunDriverConfig {
            region: "cn-hangzhou".into(),
            image_id: "aliyun_3_x64_20G".into(),
            instance_type: "ecs.t6-c1m1.large".into(),
            vswitch_id: "vsw-abc".into(),
        })
    }

    #[test]
    fn explicit_allowlist_is_respected() {
        let rendered = driver().render_firewall(&spec()).unwrap();
        assert!(rendered.contains("cidr_ip = \"10.0.0.0/8\""));
    }

    #[test]
    fn missing_image_id_fails_validation() {
        let mut driver = driver();
        driver.config.image_id = String::new();
        assert!(driver.validate(&spec()).is_err());
    }
}
