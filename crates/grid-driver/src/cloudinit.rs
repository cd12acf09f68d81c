use serde_json::Value;

use crate::driver::{InstanceSpec, ProvisionedOutputs};
use crate::error::DriverError;

/// Builds the single shell script every provider injects as its cloud-init
/// payload (GCE metadata, cloud-config `runcmd`, or a PVE cloud-init drive —
/// the script body is provider-agnostic, only the injection mechanism
/// differs). A knob at its zero value suppresses its section.
pub fn render(spec: &InstanceSpec) -> String {
    let mut script = String::from("#!/bin/sh\nset -eu\n\n");

    script.push_str("# Install container runtime\n");
    script.push_str("curl -fsSL https://get.docker.com | sh\n\n");

    if spec.swap_gb > 0 {
        script.push_str(&format!(
            "# Prepare {}G swap\nfallocate -l {}G /swapfile\nchmod 600 /swapfile\nmkswap /swapfile\nswapon /swapfile\necho '/swapfile none swap sw 0 0' >> /etc/fstab\n\n",
            spec.swap_gb, spec.swap_gb
        ));
    }

    script.push_str(&format!("# Pull build image\ndocker pull {}\n\n", spec.container_image));

    if !spec.extra_os_packages.is_empty() {
        script.push_str(&format!(
            "# Extra packages\napt-get update && apt-get install -y {}\n\n",
            spec.extra_os_packages.join(" ")
        ));
    }

    script.push_str("# Builder service unit\ncat > /etc/systemd/system/grid-builder.service <<'EOF'\n[Unit]\nDescription=grid builder agent\nAfter=network-online.target\n\n[Service]\nExecStart=/usr/bin/docker run --rm --network host \\\n");
    script.push_str(&format!("  -e GRID_BUILDER_PORT={} \\\n", spec.builder_port));
    script.push_str(&format!("  -e GRID_INSTANCE_ID={} \\\n", spec.instance_id));
    if let Some(mirror) = &spec.package_tree_mirror {
        script.push_str(&format!("  -e GRID_PACKAGE_TREE_MIRROR={} \\\n", mirror));
    }
    if let Some(host) = &spec.binary_package_host {
        script.push_str(&format!("  -e GRID_BINARY_PACKAGE_HOST={} \\\n", host));
    }
    script.push_str(&format!("  {}\n", spec.container_image));
    script.push_str("Restart=always\n\n[Install]\nWantedBy=multi-user.target\nEOF\n");
    script.push_str("systemctl enable --now grid-builder.service\n\n");

    if spec.firewall_enabled {
        script.push_str(&format!(
            "# Local firewall\nufw allow 22/tcp\nufw allow {}/tcp\nufw --force enable\n\n",
            spec.builder_port
        ));
    }

    if let Some(mirror) = &spec.package_tree_mirror {
        script.push_str(&format!("# Sync package tree\nemerge-webrsync --mirror={}\n\n", mirror));
    }

    script.push_str(&format!(
        "# Register with control plane\ncurl -fsSL -X POST {} -d '{{\"instance_id\":\"{}\",\"port\":{}}}'\n",
        spec.callback_url, spec.instance_id, spec.builder_port
    ));

    script
}

/// Parses the map format common to `terraform output -json`:
/// `{"<key>": {"value": <v>, ...}, ...}`. Shared across providers because
/// none of them deviate from this output-document shape.
pub fn parse_tf_json_output(raw_output: &str) -> Result<ProvisionedOutputs, DriverError> {
    let map: Value = serde_json::from_str(raw_output.trim())
        .map_err(|e| DriverError::OutputParse(format!("invalid JSON: {e}")))?;

    let field = |key: &str| -> Option<String> {
        map.get(key)
            .and_then(|v| v.get("value"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    let instance_name = field("instance_name")
        .ok_or_else(|| DriverError::OutputParse("missing output: instance_name".into()))?;
    let ip_address = field("ip_address")
        .ok_or_else(|| DriverError::OutputParse("missing output: ip_address".into()))?;
    let private_ip = field("private_ip");

    Ok(ProvisionedOutputs {
        instance_name,
        ip_address,
        private_ip,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_domain::InstanceId;

    fn spec(swap_gb: u32) -> InstanceSpec {
        InstanceSpec {
            instance_id: InstanceId::new("i1"),
            architecture: "amd64".into(),
            builder_port: 9000,
            callback_url: "http://cp.local/register".into(),
            container_image: "registry/grid-builder:latest".into(),
            package_tree_mirror: Some("https://mirror.example/gentoo".into()),
            binary_package_host: None,
            swap_gb,
            firewall_enabled: true,
            allowed_cidrs: vec![],
            extra_os_packages: vec![],
            ssh_public_key: "ssh-ed25519 AAAA".into(),
        }
    }

    #[test]
    fn zero_swap_suppresses_swap_block() {
        let script = render(&spec(0));
        assert!(!script.contains("swapfile"));
    }

    #[test]
    fn nonzero_swap_emits_swap_block() {
        let script = render(&spec(4));
        assert!(script.contains("4G swap"));
    }

    #[test]
    fn parses_valid_output() {
        let raw = r#"{"instance_name": {"value": "i-1"}, "ip_address": {"value": "1.2.3.4"}, "private_ip": {"value": "10.0.0.1"}}"#;
        let out = parse_tf_json_output(raw).unwrap();
        assert_eq!(out.instance_name, "i-1");
        assert_eq!(out.private_ip.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn missing_required_output_errors() {
        let raw = r#"{"ip_address": {"value": "1.2.3.4"}}"#;
        assert!(parse_tf_json_output(raw).is_err());
    }
}
