//! Request log routes, mounted only when recording is enabled
//! 请求记录接口，仅在启用时挂载

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::findex::Table;
use crate::request_log::{blocking, export_table, RequestLog};
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/set_time_diff/:fake_time", post(set_time_diff))
        .route("/requests_log", get(get_requests_log))
        .route("/reset_requests_log", post(reset_requests_log))
        .route("/export_entries_for_index/:public_id", get(export_entries_for_index))
        .route("/export_chains_for_index/:public_id", get(export_chains_for_index))
}

fn request_log(state: &AppState) -> Result<Arc<RequestLog>> {
    state
        .request_log
        .clone()
        .ok_or_else(|| Error::Internal("request log is disabled".to_string()))
}

/// POST /set_time_diff/:fake_time
pub async fn set_time_diff(
    State(state): State<Arc<AppState>>,
    Path(fake_time): Path<String>,
) -> Result<Json<()>> {
    let fake_time_ms: i64 = fake_time
        .parse()
        .map_err(|_| Error::BadRequest(format!("Cannot parse fake_time {}", fake_time)))?;

    request_log(&state)?.set_fake_time(fake_time_ms)?;
    Ok(Json(()))
}

/// GET /requests_log
pub async fn get_requests_log(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Value>>> {
    let lines = blocking(request_log(&state)?, |log| log.read_all()).await?;
    Ok(Json(lines))
}

/// POST /reset_requests_log
pub async fn reset_requests_log(State(state): State<Arc<AppState>>) -> Result<&'static str> {
    blocking(request_log(&state)?, |log| log.reset()).await?;
    Ok("OK")
}

async fn export(state: &AppState, public_id: &str, table: Table) -> Result<Json<Map<String, Value>>> {
    let index = state.cached_index(public_id).await?;
    let lines = state.indexes.fetch_all(&index, table).await?;
    Ok(Json(export_table(&lines)))
}

/// GET /export_entries_for_index/:public_id
pub async fn export_entries_for_index(
    State(state): State<Arc<AppState>>,
    Path(public_id): Path<String>,
) -> Result<Json<Map<String, Value>>> {
    export(&state, &public_id, Table::Entries).await
}

/// GET /export_chains_for_index/:public_id
pub async fn export_chains_for_index(
    State(state): State<Arc<AppState>>,
    Path(public_id): Path<String>,
) -> Result<Json<Map<String, Value>>> {
    export(&state, &public_id, Table::Chains).await
}
