use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use margo_domain::DeploymentRecord;
use margo_reconciler::keys;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.store.list(keys::record_prefix()).await?;
    Ok(StatusCode::OK)
}

pub async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let records = load_all(&state).await?;
    Ok(Json(json!({ "deployments": records })))
}

pub async fn get_deployment(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<DeploymentRecord>, ApiError> {
    let key = format!("{}{}", keys::record_prefix(), id);
    let value = state.store.get(&key).await?.ok_or_else(|| ApiError::not_found(format!("no deployment record for '{id}'")))?;
    let record: DeploymentRecord = serde_json::from_value(value).map_err(|e| ApiError::internal(format!("corrupt deployment record: {e}")))?;
    Ok(Json(record))
}

async fn load_all(state: &AppState) -> Result<Vec<DeploymentRecord>, ApiError> {
    let entries = state.store.list(keys::record_prefix()).await?;
    let records = entries
        .into_iter()
        .filter_map(|(_, value)| serde_json::from_value::<DeploymentRecord>(value).ok())
        .collect();
    Ok(records)
}
