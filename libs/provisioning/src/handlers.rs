//! Resource CRUD handlers.

use crate::AppState;
use crate::error::ApiError;

use quasar_core::config::ResourceConfig;
use quasar_core::resource::{api_version, ensure_environment, kind, name};

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListQuery {
    pub field_selector: String,
    pub limit: i64,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub items: Vec<Value>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct KeysResponse {
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: u64,
}

pub async fn list(
    State(state): State<AppState>,
    Path((group, version, resource)): Path<(String, String, String)>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let spec = state.spec(&group, &version, &resource)?;
    let items = state
        .dual
        .list(
            &spec.kubernetes.dataset(),
            &query.field_selector,
            query.limit,
        )
        .await?;
    Ok(Json(ListResponse {
        count: items.len(),
        items,
    }))
}

pub async fn keys(
    State(state): State<AppState>,
    Path((group, version, resource)): Path<(String, String, String)>,
) -> Result<Json<KeysResponse>, ApiError> {
    let spec = state.spec(&group, &version, &resource)?;
    let keys = state.dual.keys(&spec.kubernetes.dataset()).await?;
    Ok(Json(KeysResponse { keys }))
}

pub async fn count(
    State(state): State<AppState>,
    Path((group, version, resource)): Path<(String, String, String)>,
) -> Result<Json<CountResponse>, ApiError> {
    let spec = state.spec(&group, &version, &resource)?;
    let count = state.dual.count(&spec.kubernetes.dataset()).await?;
    Ok(Json(CountResponse { count }))
}

pub async fn get_resource(
    State(state): State<AppState>,
    Path((group, version, resource, id)): Path<(String, String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    let spec = state.spec(&group, &version, &resource)?;
    let found = state.dual.read(&spec.kubernetes.dataset(), &id).await?;
    Ok(Json(found))
}

pub async fn put_resource(
    State(state): State<AppState>,
    Path((group, version, resource, id)): Path<(String, String, String, String)>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let spec = state.spec(&group, &version, &resource)?;
    let mut parsed = parse_body(&body)?;
    validate_body(&spec, &id, &parsed)?;
    ensure_environment(&mut parsed);
    state.dual.create(&parsed).await?;
    Ok(StatusCode::OK)
}

pub async fn delete_resource(
    State(state): State<AppState>,
    Path((group, version, resource, id)): Path<(String, String, String, String)>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let spec = state.spec(&group, &version, &resource)?;
    let parsed = parse_body(&body)?;
    validate_body(&spec, &id, &parsed)?;
    state.dual.delete(&parsed).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))
}

fn validate_body(spec: &ResourceConfig, id: &str, resource: &Value) -> Result<(), ApiError> {
    let body_name = name(resource).ok_or_else(|| ApiError::bad_request("resource has no name"))?;
    if body_name != id {
        return Err(ApiError::bad_request(format!(
            "name mismatch: body names {body_name:?}, path names {id:?}"
        )));
    }

    let expected_api_version = spec.kubernetes.api_version();
    if api_version(resource) != Some(expected_api_version.as_str()) {
        return Err(ApiError::bad_request(format!(
            "apiVersion mismatch: expected {expected_api_version:?}"
        )));
    }

    if kind(resource) != Some(spec.kubernetes.kind.as_str()) {
        return Err(ApiError::bad_request(format!(
            "kind mismatch: expected {:?}",
            spec.kubernetes.kind
        )));
    }
    Ok(())
}
