use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use grid_scheduler::Scheduler;
use grid_sinks::{BlobStore, Notifier, Signer};
use grid_store::{BuilderRegistry, EventLog, InstanceStore, JobStore};
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer_token;
use crate::handlers;
use crate::state::AppState;

#[allow(clippy::too_many_arguments)]
pub fn build_app(
    job_store: Arc<dyn JobStore>,
    instance_store: Arc<dyn InstanceStore>,
    registry: Arc<BuilderRegistry>,
    events: Arc<dyn EventLog>,
    scheduler: Arc<Scheduler>,
    blobs: Arc<dyn BlobStore>,
    signer: Arc<dyn Signer>,
    notifier: Arc<dyn Notifier>,
    auth_token: Arc<String>,
) -> Router {
    let state = AppState {
        job_store,
        instance_store,
        registry,
        events,
        scheduler,
        blobs,
        signer,
        notifier,
        auth_token,
    };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        // Client/build submission
        .route("/api/v1/builds", post(handlers::post_builds))
        .route("/api/v1/builds/status", get(handlers::get_builds_status))
        .route("/api/v1/builds/logs", get(handlers::get_builds_logs))
        .route("/api/v1/builds/list", get(handlers::get_builds_list))
        .route("/api/v1/builds/cancel", post(handlers::post_builds_cancel))
        // Builder callbacks
        .route("/api/v1/builders/register", post(handlers::post_builders_register))
        .route("/api/v1/builders/heartbeat", post(handlers::post_builders_heartbeat))
        .route("/api/v1/builds/update", post(handlers::post_builds_update))
        .route("/api/v1/builds/complete", post(handlers::post_builds_complete))
        // Read-only introspection
        .route("/api/v1/cluster/status", get(handlers::get_cluster_status))
        .route("/api/v1/builders/status", get(handlers::get_builders_status))
        .route("/api/v1/scheduler/status", get(handlers::get_scheduler_status))
        // Ambient additions
        .route("/api/v1/instances", get(handlers::get_instances))
        .route("/api/v1/instances/:id/iac/runs", get(handlers::get_instance_iac_runs))
        .route("/api/v1/cluster/events", get(handlers::get_cluster_events))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
