use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

// ── Identifiers ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(s: impl Into<String>) -> Self {
        JobId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuilderId(pub String);

impl BuilderId {
    pub fn new(s: impl Into<String>) -> Self {
        BuilderId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BuilderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(s: impl Into<String>) -> Self {
        InstanceId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An `category/name[:slot]` package atom. Validated once at ingest
/// (see [`Atom::parse`]); downstream components treat it as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Atom(pub String);

impl Atom {
    /// Validate and wrap a raw atom string.
    ///
    /// Syntax: `category/name` optionally followed by `:slot`. Category and
    /// name must be non-empty; neither may contain `/` beyond the one
    /// separator.
    pub fn parse(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        let body = match raw.split_once(':') {
            Some((b, slot)) => {
                if slot.is_empty() {
                    return Err(DomainError::InvalidAtom(raw));
                }
                b
            }
            None => raw.as_str(),
        };
        match body.split_once('/') {
            Some((cat, name)) if !cat.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Atom(raw))
            }
            _ => Err(DomainError::InvalidAtom(raw)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A bare use-flag token (`ssl`) or its negation (`-ssl`).
///
/// Matches `-?[A-Za-z0-9_+-]+`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseFlag(pub String);

impl UseFlag {
    pub fn parse(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        let body = raw.strip_prefix('-').unwrap_or(&raw);
        let valid = !body.is_empty()
            && body
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '+' || c == '-');
        if valid {
            Ok(UseFlag(raw))
        } else {
            Err(DomainError::InvalidUseFlag(raw))
        }
    }
}

impl std::fmt::Display for UseFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── PackageSpec ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSpec {
    pub atom: Atom,
    pub version: Option<String>,
    /// Ordered; duplicates preserved (last wins at build time).
    pub use_flags: Vec<UseFlag>,
    /// Ordered; duplicates preserved.
    pub keywords: Vec<String>,
    pub slot: Option<String>,
}

impl PackageSpec {
    pub fn new(atom: Atom) -> Self {
        Self {
            atom,
            version: None,
            use_flags: Vec::new(),
            keywords: Vec::new(),
            slot: None,
        }
    }
}

// ── RepoConfig ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    Git,
    Rsync,
    Local,
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncType::Git => write!(f, "git"),
            SyncType::Rsync => write!(f, "rsync"),
            SyncType::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    pub name: String,
    pub location: String,
    pub sync_type: SyncType,
    pub sync_uri: Option<String>,
    pub priority: i64,
}

// ── PortageConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortageConfig {
    /// atom -> ordered use-flag tokens.
    pub package_use: HashMap<String, Vec<String>>,
    /// atom -> ordered keyword tokens.
    pub package_keywords: HashMap<String, Vec<String>>,
    pub masked: Vec<String>,
    pub unmasked: Vec<String>,
    pub make_conf: HashMap<String, String>,
    pub environment: HashMap<String, String>,
    pub global_use: Vec<String>,
    pub repos: Vec<RepoConfig>,
}

impl PortageConfig {
    /// Validate the invariants from spec.md §3: unique, non-negative-priority
    /// repo names.
    pub fn validate(&self) -> Result<(), DomainError> {
        let mut seen = std::collections::HashSet::new();
        for repo in &self.repos {
            if repo.name.is_empty() {
                return Err(DomainError::InvalidConfig("empty repo name".into()));
            }
            if !seen.insert(repo.name.as_str()) {
                return Err(DomainError::DuplicateRepoName(repo.name.clone()));
            }
            if repo.priority < 0 {
                return Err(DomainError::NegativeRepoPriority(repo.name.clone()));
            }
        }
        Ok(())
    }
}

// ── BundleMetadata / Bundle ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleMetadata {
    pub user_id: String,
    pub target_arch: String,
    pub profile: String,
    /// RFC 3339 timestamp.
    pub created_at: DateTime<Utc>,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bundle {
    pub config: PortageConfig,
    pub packages: Vec<PackageSpec>,
    pub metadata: BundleMetadata,
}

impl Bundle {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.packages.is_empty() {
            return Err(DomainError::EmptyPackageList);
        }
        self.config.validate()
    }

    /// The first atom of the package list, shown to clients as the "primary"
    /// display package for a job.
    pub fn primary_package(&self) -> &PackageSpec {
        &self.packages[0]
    }
}

// ── Job ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Assigned,
    Building,
    Success,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Cancelled)
    }

    /// Legal transitions per spec.md §4.2's state machine. `Failed -> Queued`
    /// (a retry) is intentionally included here; the retry-count gate lives in
    /// the job store, not in this pure state-machine check.
    pub fn can_transition_to(self, target: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, target),
            (Queued, Assigned)
                | (Assigned, Building)
                | (Assigned, Failed)
                | (Building, Success)
                | (Building, Failed)
                | (Failed, Queued)
                | (Queued, Cancelled)
                | (Assigned, Cancelled)
                | (Building, Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Assigned => "assigned",
            JobStatus::Building => "building",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub bundle: Bundle,
    pub status: JobStatus,
    pub assigned_builder: Option<BuilderId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub log: String,
    pub error: Option<String>,
    pub artifact_locator: Option<String>,
    pub retry_count: u32,
}

impl Job {
    pub fn new(id: JobId, bundle: Bundle, now: DateTime<Utc>) -> Self {
        Self {
            id,
            bundle,
            status: JobStatus::Queued,
            assigned_builder: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            log: String::new(),
            error: None,
            artifact_locator: None,
            retry_count: 0,
        }
    }

    pub fn primary_atom(&self) -> &Atom {
        &self.bundle.primary_package().atom
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceGauges {
    pub cpu_pct: f32,
    pub memory_pct: f32,
    pub disk_pct: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuilderCounters {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
}

impl BuilderCounters {
    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failed as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Builder {
    pub id: BuilderId,
    pub endpoint: String,
    pub architecture: String,
    pub capacity: u32,
    pub load: u32,
    pub enabled: bool,
    pub healthy: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub counters: BuilderCounters,
    pub gauges: ResourceGauges,
}

impl Builder {
    pub fn is_eligible(&self, architecture: &str) -> bool {
        self.enabled && self.healthy && self.architecture == architecture && self.load < self.capacity
    }

    pub fn load_ratio(&self) -> f64 {
        if self.capacity == 0 {
            1.0
        } else {
            self.load as f64 / self.capacity as f64
        }
    }
}

// ── Instance ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudProvider {
    Aws,
    Gcp,
    Aliyun,
    Pve,
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CloudProvider::Aws => "aws",
            CloudProvider::Gcp => "gcp",
            CloudProvider::Aliyun => "aliyun",
            CloudProvider::Pve => "pve",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    #[default]
    Pending,
    Provisioning,
    Active,
    Degraded,
    Error,
    Deleting,
    Deleted,
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProvisioningState::Pending => "pending",
            ProvisioningState::Provisioning => "provisioning",
            ProvisioningState::Active => "active",
            ProvisioningState::Degraded => "degraded",
            ProvisioningState::Error => "error",
            ProvisioningState::Deleting => "deleting",
            ProvisioningState::Deleted => "deleted",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub provider: CloudProvider,
    pub architecture: String,
    pub state: ProvisioningState,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub builder_id: Option<BuilderId>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub workspace_dir: String,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
    /// Hash of the architecture + provisioning template this instance was
    /// rendered from; lets the Capacity manager tell an up-to-date instance
    /// apart from one whose desired spec has since drifted.
    pub desired_hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atom_accepts_category_name() {
        assert!(Atom::parse("dev-lang/python").is_ok());
    }

    #[test]
    fn atom_accepts_slot() {
        assert!(Atom::parse("dev-lang/python:3.11").is_ok());
    }

    #[test]
    fn atom_rejects_missing_category() {
        assert!(Atom::parse("python").is_err());
    }

    #[test]
    fn atom_rejects_empty_slot() {
        assert!(Atom::parse("dev-lang/python:").is_err());
    }

    #[test]
    fn use_flag_accepts_negation() {
        assert!(UseFlag::parse("-ssl").is_ok());
        assert!(UseFlag::parse("ssl").is_ok());
    }

    #[test]
    fn use_flag_rejects_empty() {
        assert!(UseFlag::parse("-").is_err());
    }

    #[test]
    fn job_status_transitions() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Assigned));
        assert!(JobStatus::Building.can_transition_to(JobStatus::Success));
        assert!(JobStatus::Failed.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Success.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Building));
    }

    #[test]
    fn builder_eligibility_respects_capacity() {
        let b = Builder {
            id: BuilderId::new("b1"),
            endpoint: "http://x".into(),
            architecture: "amd64".into(),
            capacity: 0,
            load: 0,
            enabled: true,
            healthy: true,
            last_heartbeat: Utc::now(),
            counters: BuilderCounters::default(),
            gauges: ResourceGauges::default(),
        };
        assert!(!b.is_eligible("amd64"));
    }

    #[test]
    fn portage_config_rejects_duplicate_repo_names() {
        let cfg = PortageConfig {
            repos: vec![
                RepoConfig {
                    name: "gentoo".into(),
                    location: "/var/db/repos/gentoo".into(),
                    sync_type: SyncType::Git,
                    sync_uri: None,
                    priority: 0,
                },
                RepoConfig {
                    name: "gentoo".into(),
                    location: "/var/db/repos/other".into(),
                    sync_type: SyncType::Local,
                    sync_uri: None,
                    priority: 1,
                },
            ],
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(DomainError::DuplicateRepoName(_))));
    }
}
