//! Middleware chain of the provisioning API, outermost first: request
//! logging, token verification, readiness gating, GVR validation.

use crate::AppState;
use crate::error::ApiError;

use std::sync::atomic::Ordering;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::time::Instant;
use tracing::{debug, warn};

pub async fn request_logger(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(request).await;
    debug!(
        msg = "handled request",
        %method,
        path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
    );
    response
}

pub async fn authorize(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(verifier) = &state.verifier else {
        return next.run(request).await;
    };
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let Some(token) = token else {
        return ApiError::unauthorized("missing bearer token").into_response();
    };
    match verifier.verify(token).await {
        Ok(_claims) => next.run(request).await,
        Err(e) => {
            warn!(msg = "rejected request token", %e);
            ApiError::unauthorized("invalid token").into_response()
        }
    }
}

/// Hold API traffic until the startup synchronization has completed.
pub async fn readiness_gate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state.ready.load(Ordering::SeqCst) {
        next.run(request).await
    } else {
        ApiError::not_ready().into_response()
    }
}

/// Reject unknown `(group, version, resource)` triples before any handler
/// runs.
pub async fn validate_gvr(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    match gvr_from_path(request.uri().path()) {
        Some((group, version, resource))
            if state.registry.for_gvr(&group, &version, &resource).is_some() =>
        {
            next.run(request).await
        }
        Some((group, version, resource)) => ApiError::bad_request(format!(
            "unknown resource type {group}/{version}/{resource}"
        ))
        .into_response(),
        None => ApiError::bad_request("malformed resource path").into_response(),
    }
}

fn gvr_from_path(path: &str) -> Option<(String, String, String)> {
    let rest = path
        .strip_prefix(crate::RESOURCES_PREFIX)?
        .strip_prefix('/')?;
    let mut segments = rest.split('/');
    let group = segments.next()?;
    let version = segments.next()?;
    let resource = segments.next()?;
    if version.is_empty() || resource.is_empty() {
        return None;
    }
    Some((group.to_string(), version.to_string(), resource.to_string()))
}
