use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::BAD_REQUEST, message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::NOT_FOUND, message: msg.into() }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::CONFLICT, message: msg.into() }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::FORBIDDEN, message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, message: msg.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<grid_bundle::BundleError> for ApiError {
    fn from(e: grid_bundle::BundleError) -> Self {
        ApiError::bad_request(e.to_string())
    }
}

impl From<grid_store::StoreError> for ApiError {
    fn from(e: grid_store::StoreError) -> Self {
        use grid_store::StoreError::*;
        match e {
            JobNotFound(_) | BuilderNotFound(_) | InstanceNotFound(_) => {
                ApiError::not_found(e.to_string())
            }
            BuilderConflict(_) | IllegalTransition { .. } => ApiError::conflict(e.to_string()),
            Serialization(_) | Internal(_) => ApiError::internal(e.to_string()),
        }
    }
}

impl From<grid_scheduler::SchedulerError> for ApiError {
    fn from(e: grid_scheduler::SchedulerError) -> Self {
        match e {
            grid_scheduler::SchedulerError::Store(inner) => inner.into(),
            grid_scheduler::SchedulerError::Driver(inner) => ApiError::internal(inner.to_string()),
            grid_scheduler::SchedulerError::Dispatch(msg) => ApiError::internal(msg),
        }
    }
}

/// The blob store already retries transient failures internally; by the
/// time one surfaces here it's exhausted, so the job completion is failed
/// with an explanatory message rather than retried again at this layer.
impl From<grid_sinks::SinkError> for ApiError {
    fn from(e: grid_sinks::SinkError) -> Self {
        ApiError::internal(format!("artifact sink failed: {e}"))
    }
}
