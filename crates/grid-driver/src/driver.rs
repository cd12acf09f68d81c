use async_trait::async_trait;
use grid_domain::{CloudProvider, InstanceId};
use serde::{Deserialize, Serialize};

use crate::error::DriverError;

/// Knobs the Capacity manager resolves before asking a driver to render a
/// workspace. Any field at its zero value suppresses the section of the
/// rendered output it controls (e.g. `swap_gb = 0` emits no swap block).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub instance_id: InstanceId,
    pub architecture: String,
    pub builder_port: u16,
    pub callback_url: String,
    pub container_image: String,
    pub package_tree_mirror: Option<String>,
    pub binary_package_host: Option<String>,
    pub swap_gb: u32,
    pub firewall_enabled: bool,
    /// CIDRs allowed to reach `builder_port`. Empty defaults to
    /// `0.0.0.0/0`; the driver logs a warning when it falls back.
    pub allowed_cidrs: Vec<String>,
    pub extra_os_packages: Vec<String>,
    pub ssh_public_key: String,
}

/// Parsed from the provisioning tool's structured output after `apply`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionedOutputs {
    pub instance_name: String,
    pub ip_address: String,
    pub private_ip: Option<String>,
}

/// Renders declarative IaC config for one cloud provider and parses its
/// structured output. A driver never talks to the provider's API directly —
/// it only produces documents for the external provisioning tool to consume,
/// and interprets what that tool reports back.
#[async_trait]
pub trait Driver: Send + Sync {
    fn provider(&self) -> CloudProvider;

    /// Declares provider credentials (sourced from environment variables the
    /// manager prepares), the compute resource, and the required outputs.
    fn render_main(&self, spec: &InstanceSpec) -> Result<String, DriverError>;

    /// Opens SSH (22) from `0.0.0.0/0` and `builder_port` from
    /// `spec.allowed_cidrs`.
    fn render_firewall(&self, spec: &InstanceSpec) -> Result<String, DriverError>;

    /// A single shell script: container runtime install, swap, image pull,
    /// builder service unit, firewall, package-tree sync, control-plane
    /// registration callback.
    fn render_cloudinit(&self, spec: &InstanceSpec) -> Result<String, DriverError>;

    /// Per-provider pre-checks: required fields present, disk size in range.
    fn validate(&self, spec: &InstanceSpec) -> Result<(), DriverError>;

    /// Extract `instance_name`, `ip_address`, `private_ip` from the raw
    /// structured output of the provisioning tool (e.g. `terraform output -json`).
    fn parse_output(&self, raw_output: &str) -> Result<ProvisionedOutputs, DriverError>;
}
