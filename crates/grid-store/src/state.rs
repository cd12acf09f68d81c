use chrono::{DateTime, Utc};
use grid_domain::{BuilderId, InstanceId, JobId, JobStatus};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Serialize `value` to canonical JSON (object keys sorted) and return its
/// SHA-256 hex digest. Used by the Capacity manager to detect that a
/// re-provision of an instance is actually needed.
pub fn compute_desired_hash<T: Serialize>(value: &T) -> String {
    let v = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
    let canonical = sort_json_keys(v);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{:x}", digest)
}

fn sort_json_keys(v: serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, serde_json::Value> = map
                .into_iter()
                .map(|(k, v)| (k, sort_json_keys(v)))
                .collect();
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(sort_json_keys).collect())
        }
        other => other,
    }
}

// ── IaC run log ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IacOperation {
    Provision,
    Teardown,
}

impl std::fmt::Display for IacOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IacOperation::Provision => write!(f, "provision"),
            IacOperation::Teardown => write!(f, "teardown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IacRunStatus {
    Running,
    Succeeded,
    Failed,
}

/// A record of a single IaC tool invocation (init+apply, or destroy) against
/// one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IacRun {
    pub id: Uuid,
    pub instance_id: InstanceId,
    pub operation: IacOperation,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: IacRunStatus,
    pub exit_code: Option<i32>,
    /// Combined stdout+stderr in arrival order.
    pub log: String,
}

// ── AuditEvent ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AuditEvent {
    JobQueued {
        id: Uuid,
        at: DateTime<Utc>,
        job_id: JobId,
    },
    JobAssigned {
        id: Uuid,
        at: DateTime<Utc>,
        job_id: JobId,
        builder_id: BuilderId,
    },
    JobDispatched {
        id: Uuid,
        at: DateTime<Utc>,
        job_id: JobId,
        builder_id: BuilderId,
    },
    JobCompleted {
        id: Uuid,
        at: DateTime<Utc>,
        job_id: JobId,
        status: JobStatus,
    },
    BuilderRegistered {
        id: Uuid,
        at: DateTime<Utc>,
        builder_id: BuilderId,
    },
    BuilderLost {
        id: Uuid,
        at: DateTime<Utc>,
        builder_id: BuilderId,
    },
    InstanceProvisioned {
        id: Uuid,
        at: DateTime<Utc>,
        instance_id: InstanceId,
    },
    InstanceReclaimed {
        id: Uuid,
        at: DateTime<Utc>,
        instance_id: InstanceId,
    },
    ProvisioningFailed {
        id: Uuid,
        at: DateTime<Utc>,
        instance_id: InstanceId,
        message: String,
    },
}

impl AuditEvent {
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            AuditEvent::JobQueued { job_id, .. } => Some(job_id),
            AuditEvent::JobAssigned { job_id, .. } => Some(job_id),
            AuditEvent::JobDispatched { job_id, .. } => Some(job_id),
            AuditEvent::JobCompleted { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    pub fn instance_id(&self) -> Option<&InstanceId> {
        match self {
            AuditEvent::InstanceProvisioned { instance_id, .. } => Some(instance_id),
            AuditEvent::InstanceReclaimed { instance_id, .. } => Some(instance_id),
            AuditEvent::ProvisioningFailed { instance_id, .. } => Some(instance_id),
            _ => None,
        }
    }
}
