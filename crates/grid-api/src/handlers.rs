use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use grid_domain::{Builder, BuilderId, InstanceId, JobId, JobStatus, ResourceGauges};
use grid_sinks::Event;
use grid_store::AuditEvent;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// [`grid_store::JobStore::list`] clamps to 200 records; aggregate
/// introspection endpoints below inherit that window rather than scanning
/// the full history.
const INTROSPECTION_WINDOW: u32 = 200;

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.job_store.list(Some(1)).await?;
    Ok(StatusCode::OK)
}

// ── Client build submission ──────────────────────────────────────────────────

pub async fn post_builds(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let bundle = grid_bundle::decode(&body)?;
    let job_id = state.job_store.create(bundle).await?;
    state
        .events
        .append(AuditEvent::JobQueued {
            id: Uuid::new_v4(),
            at: Utc::now(),
            job_id: job_id.clone(),
        })
        .await?;
    Ok(Json(json!({ "job_id": job_id })))
}

#[derive(Debug, Deserialize)]
pub struct JobIdQuery {
    pub job_id: String,
}

pub async fn get_builds_status(
    State(state): State<AppState>,
    Query(q): Query<JobIdQuery>,
) -> Result<Json<Value>, ApiError> {
    let job = state.job_store.get(&JobId::new(q.job_id)).await?;
    Ok(Json(json!(job)))
}

pub async fn get_builds_logs(
    State(state): State<AppState>,
    Query(q): Query<JobIdQuery>,
) -> Result<Json<Value>, ApiError> {
    let job = state.job_store.get(&JobId::new(q.job_id)).await?;
    Ok(Json(json!({ "job_id": job.id, "logs": job.log })))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
}

pub async fn get_builds_list(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let jobs = state.job_store.list(q.limit).await?;
    let summaries: Vec<Value> = jobs
        .iter()
        .map(|j| {
            json!({
                "id": j.id,
                "status": j.status,
                "atom": j.primary_atom(),
                "target_arch": j.bundle.metadata.target_arch,
                "created_at": j.created_at,
                "updated_at": j.updated_at,
                "retry_count": j.retry_count,
            })
        })
        .collect();
    Ok(Json(json!(summaries)))
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub job_id: String,
}

pub async fn post_builds_cancel(
    State(state): State<AppState>,
    Json(body): Json<CancelBody>,
) -> Result<Json<Value>, ApiError> {
    let job_id = JobId::new(body.job_id);
    state.scheduler.cancel(&job_id).await?;
    let job = state.job_store.get(&job_id).await?;
    Ok(Json(json!({ "job_id": job.id, "status": job.status })))
}

// ── Builder callbacks ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterBody {
    pub id: String,
    pub endpoint: String,
    pub architecture: String,
    pub capacity: u32,
}

pub async fn post_builders_register(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<Json<Value>, ApiError> {
    let builder_id = BuilderId::new(body.id);
    let builder = Builder {
        id: builder_id.clone(),
        endpoint: body.endpoint,
        architecture: body.architecture,
        capacity: body.capacity,
        load: 0,
        enabled: true,
        healthy: true,
        last_heartbeat: Utc::now(),
        counters: Default::default(),
        gauges: Default::default(),
    };
    state.registry.register(builder).await?;
    state
        .events
        .append(AuditEvent::BuilderRegistered {
            id: Uuid::new_v4(),
            at: Utc::now(),
            builder_id,
        })
        .await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatBody {
    pub builder_id: String,
    pub cpu: f32,
    pub memory: f32,
    pub disk: f32,
}

/// An unknown `builder_id` is a silent no-op (per [`grid_store::BuilderRegistry::heartbeat`]).
pub async fn post_builders_heartbeat(
    State(state): State<AppState>,
    Json(body): Json<HeartbeatBody>,
) -> Json<Value> {
    let gauges = ResourceGauges {
        cpu_pct: body.cpu,
        memory_pct: body.memory,
        disk_pct: body.disk,
    };
    state
        .registry
        .heartbeat(&BuilderId::new(body.builder_id), gauges)
        .await;
    Json(json!({ "ok": true }))
}

fn assignment_matches(job: &grid_domain::Job, builder_id: &str) -> bool {
    job.assigned_builder
        .as_ref()
        .map(|b| b.as_str() == builder_id)
        .unwrap_or(false)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateBody {
    pub job_id: String,
    pub builder_id: String,
    pub status: JobStatus,
    pub log: Option<String>,
}

/// Authenticated by the assignment itself: the caller must name the
/// `builder_id` currently holding the job (spec.md §9's "assignment token"
/// resolved as the `(job_id, builder_id)` pair rather than a separate
/// opaque secret — see DESIGN.md). A transition the job can no longer make
/// (e.g. a late `building` after `cancelled`) is dropped without error.
pub async fn post_builds_update(
    State(state): State<AppState>,
    Json(body): Json<UpdateBody>,
) -> Result<Json<Value>, ApiError> {
    let job_id = JobId::new(body.job_id);
    let job = state.job_store.get(&job_id).await?;
    if !assignment_matches(&job, &body.builder_id) {
        return Err(ApiError::forbidden("builder is not assigned to this job"));
    }

    if let Some(chunk) = &body.log {
        state.job_store.append_log(&job_id, chunk).await?;
    }

    if job.status.can_transition_to(body.status) {
        state.job_store.transition(&job_id, body.status).await?;
    } else {
        warn!(job_id = %job_id, from = %job.status, to = %body.status, "ignoring stale builder transition");
    }
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompleteBody {
    pub job_id: String,
    pub builder_id: String,
    pub status: JobStatus,
    /// Naming hint for the persisted blob; NOT trusted as the final
    /// locator when `artifact` bytes are also present (see below).
    pub artifact_locator: Option<String>,
    /// Base64-encoded artifact bytes. Present on a successful build; signed
    /// and persisted through the blob store before the job record gets its
    /// locator, so `artifact_locator` alone is never taken at face value.
    pub artifact: Option<String>,
    pub error: Option<String>,
}

pub async fn post_builds_complete(
    State(state): State<AppState>,
    Json(body): Json<CompleteBody>,
) -> Result<Json<Value>, ApiError> {
    let job_id = JobId::new(body.job_id);
    let job = state.job_store.get(&job_id).await?;
    if !assignment_matches(&job, &body.builder_id) {
        return Err(ApiError::forbidden("builder is not assigned to this job"));
    }
    if !job.status.can_transition_to(body.status) {
        warn!(job_id = %job_id, from = %job.status, to = %body.status, "ignoring stale builder completion");
        return Ok(Json(json!({ "ok": true })));
    }

    state.job_store.transition(&job_id, body.status).await?;
    if let Some(message) = &body.error {
        state.job_store.set_error(&job_id, message).await?;
    }

    if body.status == JobStatus::Success {
        if let Some(encoded) = &body.artifact {
            let bytes = BASE64
                .decode(encoded)
                .map_err(|e| ApiError::bad_request(format!("invalid base64 artifact: {e}")))?;
            let hint = body.artifact_locator.clone().unwrap_or_else(|| job_id.to_string());
            let signature = state.signer.sign(&bytes);
            let locator = state.blobs.put(&hint, &bytes).await?;
            state.blobs.put(&format!("{hint}.sig"), &signature.0).await?;
            state.job_store.set_artifact_locator(&job_id, &locator.0).await?;
        } else if let Some(locator) = &body.artifact_locator {
            state.job_store.set_artifact_locator(&job_id, locator).await?;
        }
    }

    let builder_id = BuilderId::new(body.builder_id);
    state
        .registry
        .record_completion(&builder_id, body.status == JobStatus::Success)
        .await;
    state.registry.set_load(&builder_id, -1).await.ok();

    state
        .events
        .append(AuditEvent::JobCompleted {
            id: Uuid::new_v4(),
            at: Utc::now(),
            job_id: job_id.clone(),
            status: body.status,
        })
        .await?;

    match body.status {
        JobStatus::Success => {
            state.notifier.notify(Event::JobSucceeded { job_id: job_id.to_string() }).await;
        }
        JobStatus::Failed => {
            let reason = body.error.clone().unwrap_or_else(|| "unspecified".to_string());
            state.notifier.notify(Event::JobFailed { job_id: job_id.to_string(), reason }).await;
        }
        _ => {}
    }

    Ok(Json(json!({ "ok": true })))
}

// ── Read-only introspection ───────────────────────────────────────────────────

pub async fn get_cluster_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let jobs = state.job_store.list(Some(INTROSPECTION_WINDOW)).await?;
    let builders = state.registry.list().await;

    let mut by_status: HashMap<String, usize> = HashMap::new();
    let mut succeeded = 0usize;
    for job in &jobs {
        *by_status.entry(job.status.to_string()).or_default() += 1;
        if job.status == JobStatus::Success {
            succeeded += 1;
        }
    }
    let success_rate = if jobs.is_empty() {
        0.0
    } else {
        succeeded as f64 / jobs.len() as f64
    };

    Ok(Json(json!({
        "jobs_sampled": jobs.len(),
        "by_status": by_status,
        "success_rate": success_rate,
        "builders_total": builders.len(),
        "builders_healthy": builders.iter().filter(|b| b.healthy).count(),
    })))
}

pub async fn get_builders_status(State(state): State<AppState>) -> Json<Value> {
    let builders = state.registry.list().await;
    let detail: Vec<Value> = builders
        .iter()
        .map(|b| {
            json!({
                "id": b.id,
                "endpoint": b.endpoint,
                "architecture": b.architecture,
                "capacity": b.capacity,
                "load": b.load,
                "enabled": b.enabled,
                "healthy": b.healthy,
                "last_heartbeat": b.last_heartbeat,
                "counters": b.counters,
                "gauges": b.gauges,
            })
        })
        .collect();
    Json(json!({ "count": builders.len(), "builders": detail }))
}

pub async fn get_scheduler_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let jobs = state.job_store.list(Some(INTROSPECTION_WINDOW)).await?;
    let mut queue_depth: HashMap<String, u32> = HashMap::new();
    for job in jobs.iter().filter(|j| j.status == JobStatus::Queued) {
        *queue_depth.entry(job.bundle.metadata.target_arch.clone()).or_insert(0) += 1;
    }

    let builders = state.registry.list().await;
    let per_builder: Vec<Value> = builders
        .iter()
        .map(|b| {
            json!({
                "id": b.id,
                "architecture": b.architecture,
                "load": b.load,
                "capacity": b.capacity,
            })
        })
        .collect();

    Ok(Json(json!({ "queue_depth": queue_depth, "builders": per_builder })))
}

// ── Ambient: instances, IaC runs, events ──────────────────────────────────────

pub async fn get_instances(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let instances = state.instance_store.list().await?;
    Ok(Json(json!(instances)))
}

pub async fn get_instance_iac_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let runs = state.instance_store.list_iac_runs(&InstanceId::new(id)).await?;
    Ok(Json(json!(runs)))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<u32>,
}

pub async fn get_cluster_events(
    State(state): State<AppState>,
    Query(q): Query<EventsQuery>,
) -> Result<Json<Value>, ApiError> {
    let events = state.events.list(q.limit.unwrap_or(100)).await?;
    Ok(Json(json!(events)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::{Json as ExtractJson, State};
    use grid_domain::{Atom, Bundle, BundleMetadata, PackageSpec, PortageConfig};
    use grid_scheduler::{Scheduler, SchedulerConfig};
    use grid_sinks::{Ed25519Signer, FsBlobStore, LogNotifier};
    use grid_store::{
        BuilderRegistry, InMemoryEventLog, InMemoryInstanceStore, InMemoryJobStore, JobStore,
    };

    use super::*;

    fn sample_bundle() -> Bundle {
        Bundle {
            config: PortageConfig::default(),
            packages: vec![PackageSpec::new(Atom::parse("dev-lang/python").unwrap())],
            metadata: BundleMetadata {
                user_id: "alice".into(),
                target_arch: "amd64".into(),
                profile: "default/linux/amd64/23.0".into(),
                created_at: Utc::now(),
                description: "test".into(),
            },
        }
    }

    async fn test_state(dir: &std::path::Path) -> AppState {
        let job_store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let instance_store: Arc<dyn grid_store::InstanceStore> =
            Arc::new(InMemoryInstanceStore::new());
        let registry = Arc::new(BuilderRegistry::new());
        let events: Arc<dyn grid_store::EventLog> = Arc::new(InMemoryEventLog::new());
        let scheduler = Arc::new(Scheduler::new(
            job_store.clone(),
            registry.clone(),
            events.clone(),
            SchedulerConfig::default(),
        ));
        AppState {
            job_store,
            instance_store,
            registry,
            events,
            scheduler,
            blobs: Arc::new(FsBlobStore::new(dir)),
            signer: Arc::new(Ed25519Signer::generate()),
            notifier: Arc::new(LogNotifier),
            auth_token: Arc::new("test-token".to_string()),
        }
    }

    #[tokio::test]
    async fn completion_signs_and_persists_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;

        let job_id = state.job_store.create(sample_bundle()).await.unwrap();
        state.job_store.transition(&job_id, JobStatus::Assigned).await.unwrap();
        state
            .job_store
            .set_assigned_builder(&job_id, &BuilderId::new("b1"))
            .await
            .unwrap();
        state.job_store.transition(&job_id, JobStatus::Building).await.unwrap();

        let artifact = BASE64.encode(b"built-package-bytes");
        let body = CompleteBody {
            job_id: job_id.0.clone(),
            builder_id: "b1".into(),
            status: JobStatus::Success,
            artifact_locator: Some("pkg".into()),
            artifact: Some(artifact),
            error: None,
        };

        post_builds_complete(State(state.clone()), ExtractJson(body)).await.unwrap();

        let job = state.job_store.get(&job_id).await.unwrap();
        let locator = job.artifact_locator.expect("locator recorded");
        assert_ne!(locator, "pkg", "locator should be the blob store's, not the builder's hint");
        let persisted = tokio::fs::read(&locator).await.unwrap();
        assert_eq!(persisted, b"built-package-bytes");

        let sig_path = dir.path().join("pkg.sig");
        assert!(sig_path.exists(), "signature should be persisted alongside the artifact");
    }

    #[tokio::test]
    async fn completion_without_artifact_keeps_builder_locator() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;

        let job_id = state.job_store.create(sample_bundle()).await.unwrap();
        state.job_store.transition(&job_id, JobStatus::Assigned).await.unwrap();
        state
            .job_store
            .set_assigned_builder(&job_id, &BuilderId::new("b1"))
            .await
            .unwrap();
        state.job_store.transition(&job_id, JobStatus::Building).await.unwrap();

        let body = CompleteBody {
            job_id: job_id.0.clone(),
            builder_id: "b1".into(),
            status: JobStatus::Success,
            artifact_locator: Some("blob://already-there".into()),
            artifact: None,
            error: None,
        };

        post_builds_complete(State(state.clone()), ExtractJson(body)).await.unwrap();

        let job = state.job_store.get(&job_id).await.unwrap();
        assert_eq!(job.artifact_locator.as_deref(), Some("blob://already-there"));
    }
}
