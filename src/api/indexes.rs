//! Index management handlers / 索引管理接口

use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;

use crate::auth::{resolve_project, Auth};
use crate::error::{Error, Result};
use crate::models::{CreateIndexRequest, Index, ListIndexesQuery, NewIndex};
use crate::state::AppState;

/// GET /indexes
pub async fn list_indexes(
    State(state): State<Arc<AppState>>,
    auth: Auth,
    Query(query): Query<ListIndexesQuery>,
) -> Result<Json<Vec<Index>>> {
    let project_uuid =
        resolve_project(state.tenancy.as_ref(), &auth, query.project_uuid.as_deref()).await?;

    let mut indexes = state.metadata.get_indexes(&project_uuid).await?;
    state.indexes.set_sizes(&mut indexes).await?;
    Ok(Json(indexes))
}

/// POST /indexes
pub async fn create_index(
    State(state): State<Arc<AppState>>,
    auth: Auth,
    Json(req): Json<CreateIndexRequest>,
) -> Result<Json<Index>> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(Error::BadRequest("index name cannot be empty".to_string()));
    }

    let project_uuid =
        resolve_project(state.tenancy.as_ref(), &auth, req.project_uuid.as_deref()).await?;

    let index = state
        .metadata
        .create_index(NewIndex::generate(&auth.authz_id, &project_uuid, name))
        .await?;
    Ok(Json(index))
}

/// GET /indexes/:public_id
pub async fn get_index(
    State(state): State<Arc<AppState>>,
    auth: Auth,
    Path(public_id): Path<String>,
) -> Result<Json<Index>> {
    let mut index = state
        .metadata
        .get_index(&public_id)
        .await?
        .filter(|index| index.authz_id == auth.authz_id)
        .ok_or_else(|| Error::UnknownIndex(public_id.clone()))?;

    state.indexes.set_size(&mut index).await?;
    Ok(Json(index))
}

/// DELETE /indexes/:public_id
///
/// Lines stay in the encrypted tables; the index simply stops resolving.
pub async fn delete_index(
    State(state): State<Arc<AppState>>,
    auth: Auth,
    Path(public_id): Path<String>,
) -> Result<Json<()>> {
    if !state.metadata.delete_index(&public_id, &auth.authz_id).await? {
        tracing::debug!("Nothing to delete for index {}", public_id);
    }
    state.metadata_cache.evict(&public_id);
    Ok(Json(()))
}
