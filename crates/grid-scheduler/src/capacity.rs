use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use grid_domain::{Builder, CloudProvider, Instance, InstanceId, JobStatus, ProvisioningState};
use grid_driver::{DriverRegistry, IacRunner, InstanceSpec};
use grid_store::{compute_desired_hash, AuditEvent, BuilderRegistry, EventLog, InstanceStore, JobStore};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SchedulerError;

/// Per-instance knobs that don't vary with the scaling decision — resolved
/// once at manager construction from operator configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningTemplate {
    pub container_image: String,
    pub package_tree_mirror: Option<String>,
    pub binary_package_host: Option<String>,
    pub builder_port: u16,
    pub swap_gb: u32,
    pub firewall_enabled: bool,
    pub allowed_cidrs: Vec<String>,
    pub extra_os_packages: Vec<String>,
    pub ssh_public_key: String,
    pub callback_base_url: String,
}

#[derive(Debug, Clone)]
pub struct CapacityConfig {
    pub check_interval: Duration,
    pub idle_ttl: Duration,
    pub max_lifetime: Duration,
    pub dead_threshold: Duration,
    pub default_max_instances: u32,
    pub max_instances: HashMap<String, u32>,
    /// Cloud provider new instances are rendered/provisioned against.
    /// Must have a matching driver registered in the `DriverRegistry`
    /// passed to [`CapacityManager::new`].
    pub default_provider: CloudProvider,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            idle_ttl: Duration::from_secs(60 * 60),
            // Open Question (spec.md §9): no default lifetime cap is named.
            // Resolved at 12h — long enough that it rarely fires ahead of
            // idle_ttl, short enough to bound exposure to a stuck instance.
            max_lifetime: Duration::from_secs(12 * 60 * 60),
            dead_threshold: Duration::from_secs(10 * 60),
            default_max_instances: 4,
            max_instances: HashMap::new(),
            default_provider: CloudProvider::Aws,
        }
    }
}

impl CapacityConfig {
    fn cap_for(&self, architecture: &str) -> u32 {
        self.max_instances
            .get(architecture)
            .copied()
            .unwrap_or(self.default_max_instances)
    }
}

/// Monitors queue depth against fleet size and reconciles the instance
/// fleet accordingly. Never calls a cloud API directly — provisioning is
/// delegated entirely to the IaC driver.
pub struct CapacityManager {
    job_store: Arc<dyn JobStore>,
    instance_store: Arc<dyn InstanceStore>,
    registry: Arc<BuilderRegistry>,
    drivers: Arc<DriverRegistry>,
    runner: Arc<IacRunner>,
    events: Arc<dyn EventLog>,
    template: ProvisioningTemplate,
    config: CapacityConfig,
}

impl CapacityManager {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        instance_store: Arc<dyn InstanceStore>,
        registry: Arc<BuilderRegistry>,
        drivers: Arc<DriverRegistry>,
        runner: Arc<IacRunner>,
        events: Arc<dyn EventLog>,
        template: ProvisioningTemplate,
        config: CapacityConfig,
    ) -> Self {
        Self {
            job_store,
            instance_store,
            registry,
            drivers,
            runner,
            events,
            template,
            config,
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.check_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                warn!(error = %e, "capacity tick failed");
            }
        }
    }

    async fn tick(&self) -> Result<(), SchedulerError> {
        self.reclaim_dead_instances().await?;
        self.scale_down_idle().await?;
        self.scale_up().await?;
        Ok(())
    }

    /// Scale up: one instance per architecture per tick while queue depth
    /// exceeds headroom, bounded by `max_instances(A)`.
    async fn scale_up(&self) -> Result<(), SchedulerError> {
        let jobs = self.job_store.list(None).await?;
        let mut queued_depth: HashMap<String, u32> = HashMap::new();
        for job in jobs.iter().filter(|j| j.status == JobStatus::Queued) {
            *queued_depth.entry(job.bundle.metadata.target_arch.clone()).or_insert(0) += 1;
        }

        let instances = self.instance_store.list().await?;
        let mut fleet_count: HashMap<String, u32> = HashMap::new();
        for instance in &instances {
            if !matches!(instance.state, ProvisioningState::Deleted | ProvisioningState::Deleting) {
                *fleet_count.entry(instance.architecture.clone()).or_insert(0) += 1;
            }
        }

        for (architecture, depth) in queued_depth {
            let headroom = self.headroom(&architecture).await;
            if depth <= headroom {
                continue;
            }
            let current = fleet_count.get(&architecture).copied().unwrap_or(0);
            if current >= self.config.cap_for(&architecture) {
                warn!(architecture = %architecture, current, "at max_instances cap; not scaling up");
                continue;
            }
            // Headroom lags a just-provisioned instance until its builder
            // registers; skip if one already matches the current desired
            // spec for this architecture rather than piling on a duplicate.
            let desired = self.desired_hash_for(&architecture);
            let already_satisfied = instances.iter().any(|i| {
                i.architecture == architecture
                    && i.desired_hash.as_deref() == Some(desired.as_str())
                    && matches!(i.state, ProvisioningState::Provisioning | ProvisioningState::Active)
            });
            if already_satisfied {
                info!(architecture = %architecture, "desired instance already in flight; not scaling up");
                continue;
            }
            self.provision_one(&architecture).await?;
        }
        Ok(())
    }

    /// Hash of the architecture plus the current provisioning template,
    /// recorded on each instance at provision time so a later tick can tell
    /// whether an existing instance already matches what would be rendered.
    fn desired_hash_for(&self, architecture: &str) -> String {
        compute_desired_hash(&(architecture, &self.template))
    }

    /// Sum of free slots (`capacity - load`) across eligible builders —
    /// provisioning only happens when no immediate slot exists.
    async fn headroom(&self, architecture: &str) -> u32 {
        self.registry
            .eligible(architecture)
            .await
            .iter()
            .map(|b: &Builder| b.capacity.saturating_sub(b.load))
            .sum()
    }

    async fn provision_one(&self, architecture: &str) -> Result<(), SchedulerError> {
        let provider = self.config.default_provider;
        let driver = self.drivers.for_provider(provider)?;
        let desired_hash = self.desired_hash_for(architecture);

        let instance_id = InstanceId::new(format!("inst-{}", Uuid::new_v4()));
        let spec = InstanceSpec {
            instance_id: instance_id.clone(),
            architecture: architecture.to_string(),
            builder_port: self.template.builder_port,
            callback_url: format!(
                "{}/api/v1/builders/register",
                self.template.callback_base_url.trim_end_matches('/')
            ),
            container_image: self.template.container_image.clone(),
            package_tree_mirror: self.template.package_tree_mirror.clone(),
            binary_package_host: self.template.binary_package_host.clone(),
            swap_gb: self.template.swap_gb,
            firewall_enabled: self.template.firewall_enabled,
            allowed_cidrs: self.template.allowed_cidrs.clone(),
            extra_os_packages: self.template.extra_os_packages.clone(),
            ssh_public_key: self.template.ssh_public_key.clone(),
        };

        driver.validate(&spec)?;
        let workspace = self.runner.workspace_dir(&instance_id);
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| SchedulerError::Driver(grid_driver::DriverError::Internal(e.to_string())))?;
        tokio::fs::write(workspace.join("main.tf"), driver.render_main(&spec)?)
            .await
            .map_err(|e| SchedulerError::Driver(grid_driver::DriverError::Internal(e.to_string())))?;
        tokio::fs::write(workspace.join("firewall.tf"), driver.render_firewall(&spec)?)
            .await
            .map_err(|e| SchedulerError::Driver(grid_driver::DriverError::Internal(e.to_string())))?;
        tokio::fs::write(workspace.join("cloud-init.sh"), driver.render_cloudinit(&spec)?)
            .await
            .map_err(|e| SchedulerError::Driver(grid_driver::DriverError::Internal(e.to_string())))?;

        let mut instance = Instance {
            id: instance_id.clone(),
            provider,
            architecture: architecture.to_string(),
            state: ProvisioningState::Provisioning,
            public_ip: None,
            private_ip: None,
            builder_id: None,
            last_heartbeat: None,
            workspace_dir: workspace.display().to_string(),
            created_at: Utc::now(),
            last_error: None,
            desired_hash: Some(desired_hash),
        };
        self.instance_store.upsert(&instance).await?;

        let (run, result) = self.runner.apply(&instance_id, &HashMap::new()).await;
        self.instance_store.append_iac_run(&run).await?;

        let outcome: Result<_, SchedulerError> = result
            .map_err(SchedulerError::from)
            .and_then(|raw| driver.parse_output(&raw).map_err(SchedulerError::from));
        match outcome {
            Ok(outputs) => {
                instance.state = ProvisioningState::Active;
                instance.public_ip = Some(outputs.ip_address);
                instance.private_ip = outputs.private_ip;
                self.instance_store.upsert(&instance).await?;
                self.events
                    .append(AuditEvent::InstanceProvisioned {
                        id: Uuid::new_v4(),
                        at: Utc::now(),
                        instance_id: instance_id.clone(),
                    })
                    .await?;
                info!(%instance_id, architecture, "instance provisioned");
            }
            Err(e) => {
                let message = e.to_string();
                instance.state = ProvisioningState::Error;
                instance.last_error = Some(message.clone());
                self.instance_store.upsert(&instance).await?;
                self.events
                    .append(AuditEvent::ProvisioningFailed {
                        id: Uuid::new_v4(),
                        at: Utc::now(),
                        instance_id: instance_id.clone(),
                        message,
                    })
                    .await?;
                warn!(%instance_id, architecture, error = %e, "instance provisioning failed");
            }
        }
        Ok(())
    }

    /// Scale down instances idle beyond `idle_ttl` or past `max_lifetime`,
    /// whichever comes first. An instance with a non-empty recent log
    /// stream — i.e. its builder currently has load — counts as non-idle.
    async fn scale_down_idle(&self) -> Result<(), SchedulerError> {
        let now = Utc::now();
        for instance in self.instance_store.list().await? {
            if instance.state != ProvisioningState::Active {
                continue;
            }
            let age = now.signed_duration_since(instance.created_at);
            let past_lifetime = age.to_std().unwrap_or_default() > self.config.max_lifetime;

            let idle = match &instance.builder_id {
                Some(builder_id) => match self.registry.get(builder_id).await {
                    Ok(builder) if builder.load == 0 => true,
                    Ok(_) => false,
                    Err(_) => true, // builder already gone; instance has nothing to serve
                },
                None => true,
            };

            let idle_too_long = idle
                && instance
                    .last_heartbeat
                    .map(|hb| now.signed_duration_since(hb).to_std().unwrap_or_default() > self.config.idle_ttl)
                    .unwrap_or(true);

            if past_lifetime || idle_too_long {
                self.teardown(instance).await?;
            }
        }
        Ok(())
    }

    /// Instances whose builder heartbeat has been absent for
    /// `dead_threshold` are reclaimed regardless of provider-reported state.
    async fn reclaim_dead_instances(&self) -> Result<(), SchedulerError> {
        let now = Utc::now();
        for instance in self.instance_store.list().await? {
            if matches!(instance.state, ProvisioningState::Deleted | ProvisioningState::Deleting) {
                continue;
            }
            let dead = instance
                .last_heartbeat
                .map(|hb| now.signed_duration_since(hb).to_std().unwrap_or_default() > self.config.dead_threshold)
                .unwrap_or(false);
            if dead {
                warn!(instance_id = %instance.id, "reclaiming instance: heartbeat absent beyond dead_threshold");
                self.teardown(instance).await?;
            }
        }
        Ok(())
    }

    async fn teardown(&self, mut instance: Instance) -> Result<(), SchedulerError> {
        instance.state = ProvisioningState::Deleting;
        self.instance_store.upsert(&instance).await?;

        let (run, result) = self.runner.destroy(&instance.id, &HashMap::new()).await;
        self.instance_store.append_iac_run(&run).await?;

        match result {
            Ok(()) => {
                instance.state = ProvisioningState::Deleted;
                self.instance_store.upsert(&instance).await?;
                self.events
                    .append(AuditEvent::InstanceReclaimed {
                        id: Uuid::new_v4(),
                        at: Utc::now(),
                        instance_id: instance.id.clone(),
                    })
                    .await?;
                info!(instance_id = %instance.id, "instance reclaimed");
            }
            Err(e) => {
                instance.state = ProvisioningState::Error;
                instance.last_error = Some(e.to_string());
                self.instance_store.upsert(&instance).await?;
                warn!(instance_id = %instance.id, error = %e, "teardown failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_domain::{BuilderCounters, BuilderId, ResourceGauges};
    use grid_store::{InMemoryEventLog, InMemoryInstanceStore, InMemoryJobStore};

    fn sample_config() -> CapacityConfig {
        CapacityConfig {
            check_interval: Duration::from_secs(1),
            ..Default::default()
        }
    }

    fn sample_template() -> ProvisioningTemplate {
        ProvisioningTemplate {
            container_image: "registry.example/grid-builder:latest".into(),
            package_tree_mirror: None,
            binary_package_host: None,
            builder_port: 9000,
            swap_gb: 0,
            firewall_enabled: true,
            allowed_cidrs: vec![],
            extra_os_packages: vec![],
            ssh_public_key: "ssh-ed25519 AAAA".into(),
            callback_base_url: "http://control-plane.local".into(),
        }
    }

    async fn manager(tmp: &std::path::Path) -> CapacityManager {
        let mut drivers = DriverRegistry::new();
        drivers.register(Arc::new(grid_driver::LocalDriver::new()));

        CapacityManager::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(InMemoryInstanceStore::new()),
            Arc::new(BuilderRegistry::new()),
            Arc::new(drivers),
            Arc::new(IacRunner::new("true", tmp)),
            Arc::new(InMemoryEventLog::new()),
            sample_template(),
            sample_config(),
        )
    }

    #[tokio::test]
    async fn headroom_sums_free_slots_across_eligible_builders() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path()).await;
        m.registry
            .register(Builder {
                id: BuilderId::new("b1"),
                endpoint: "http://b1.local:9000".into(),
                architecture: "amd64".into(),
                capacity: 4,
                load: 1,
                enabled: true,
                healthy: true,
                last_heartbeat: Utc::now(),
                counters: BuilderCounters::default(),
                gauges: ResourceGauges::default(),
            })
            .await
            .unwrap();
        assert_eq!(m.headroom("amd64").await, 3);
        assert_eq!(m.headroom("arm64").await, 0);
    }

    #[tokio::test]
    async fn scale_up_respects_max_instances_cap() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample_config();
        config.default_max_instances = 0;
        let m = CapacityManager {
            config,
            ..manager(dir.path()).await
        };
        m.job_store
            .create(grid_domain::Bundle {
                config: grid_domain::PortageConfig::default(),
                packages: vec![grid_domain::PackageSpec::new(
                    grid_domain::Atom::parse("dev-lang/python").unwrap(),
                )],
                metadata: grid_domain::BundleMetadata {
                    user_id: "alice".into(),
                    target_arch: "amd64".into(),
                    profile: "default/linux/amd64/23.0".into(),
                    created_at: Utc::now(),
                    description: "t".into(),
                },
            })
            .await
            .unwrap();

        m.scale_up().await.unwrap();
        assert!(m.instance_store.list().await.unwrap().is_empty());
    }
}
