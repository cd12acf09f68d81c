use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::state::AppState;

/// Requires a valid `Authorization: Bearer <token>` header. Applied to every
/// route in [`crate::app::build_app`] — there are no public endpoints.
///
/// Builder-callback endpoints that also require the per-job assignment
/// token (`/api/v1/builds/update`, `/api/v1/builds/complete`) check that
/// separately in their handlers, since the assignment token is scoped to
/// one job rather than the whole API surface.
pub async fn require_bearer_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == state.auth_token.as_str() => next.run(request).await,
        _ => (StatusCode::UNAUTHORIZED, "Unauthorized\n").into_response(),
    }
}
