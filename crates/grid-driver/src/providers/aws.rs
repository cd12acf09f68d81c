use grid_domain::CloudProvider;
use serde::Deserialize;
use tracing::warn;

use crate::driver::{Driver, InstanceSpec, ProvisionedOutputs};
use crate::error::DriverError;

/// Static operator configuration for the AWS driver: the parts of the
/// rendered documents that don't vary per instance.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsDriverConfig {
    pub region: String,
    pub ami_id: String,
    pub instance_type: String,
    pub subnet_id: String,
    pub key_name: String,
}

pub struct AwsDriver {
    pub config: AwsDriverConfig,
}

impl AwsDriver {
    pub fn new(config: AwsDriverConfig) -> Self {
        Self { config }
    }
}

impl Driver for AwsDriver {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Aws
    }

    fn render_main(&self, spec: &InstanceSpec) -> Result<String, DriverError> {
        self.validate(spec)?;
        let mut hcl = String::from("# Generated — do not edit\n");
        hcl.push_str("provider \"aws\" {\n");
        hcl.push_str(&format!("  region = {:?}\n", self.config.region));
        hcl.push_str("}\n\n");
        hcl.push_str("resource \"aws_instance\" \"builder\" {\n");
        hcl.push_str(&format!("  ami           = {:?}\n", self.config.ami_id));
        hcl.push_str(&format!("  instance_type = {:?}\n", self.config.instance_type));
        hcl.push_str(&format!("  subnet_id     = {:?}\n", self.config.subnet_id));
        hcl.push_str(&format!("  key_name      = {:?}\n", self.config.key_name));
        hcl.push_str("  vpc_security_group_ids = [aws_security_group.builder.id]\n");
        hcl.push_str(&format!(
            "  tags = {{ Name = {:?}, GridInstance = {:?} }}\n",
            spec.instance_id, spec.instance_id
        ));
        hcl.push_str("  user_data = file(\"cloud-init.sh\")\n");
        hcl.push_str("}\n\n");
        hcl.push_str("output \"instance_name\" { value = aws_instance.builder.id }\n");
        hcl.push_str("output \"ip_address\" { value = aws_instance.builder.public_ip }\n");
        hcl.push_str("output \"private_ip\" { value = aws_instance.builder.private_ip }\n");
        Ok(hcl)
    }

    fn render_firewall(&self, spec: &InstanceSpec) -> Result<String, DriverError> {
        let cidrs = effective_cidrs(&spec.allowed_cidrs);
        let mut hcl = String::from("resource \"aws_security_group\" \"builder\" {\n");
        hcl.push_str("  ingress {\n    from_port = 22\n    to_port = 22\n    protocol = \"tcp\"\n");
        hcl.push_str("    cidr_blocks = [\"0.0.0.0/0\"]\n  }\n");
        hcl.push_str(&format!(
            "  ingress {{\n    from_port = {0}\n    to_port = {0}\n    protocol = \"tcp\"\n",
            spec.builder_port
        ));
        hcl.push_str(&format!("    cidr_blocks = {:?}\n  }}\n", cidrs));
        hcl.push_str("}\n");
        Ok(hcl)
    }

    fn render_cloudinit(&self, spec: &InstanceSpec) -> Result<String, DriverError> {
        Ok(crate::cloudinit::render(spec))
    }

    fn validate(&self, spec: &InstanceSpec) -> Result<(), DriverError> {
        if self.config.region.is_empty() || self.config.ami_id.is_empty() {
            return Err(DriverError::Validation(
                "aws driver requires region and ami_id".into(),
            ));
        }
        if spec.architecture.is_empty() {
            return Err(DriverError::Validation("instance spec missing architecture".into()));
        }
        Ok(())
    }

    fn parse_output(&self, raw_output: &str) -> Result<ProvisionedOutputs, DriverError> {
        crate::cloudinit::parse_tf_json_output(raw_output)
    }
}

fn effective_cidrs(allowed: &[String]) -> Vec<String> {
    if allowed.is_empty() {
        warn!("no allowed_cidrs configured for builder port; defaulting to 0.0.0.0/0");
        vec!["0.0.0.0/0".to_string()]
    } else {
        allowed.to_vec()
    }
}
