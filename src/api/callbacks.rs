//! Findex callback handlers / Findex 回调接口
//!
//! Bodies are signed with the seed matching the callback; the index is
//! resolved by public ID alone since the signature is the credential.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::error::Result;
use crate::findex::codec;
use crate::findex::signature::{check_body_signature, unix_now};
use crate::findex::Table;
use crate::models::Index;
use crate::request_log;
use crate::state::AppState;

#[derive(Debug, Clone, Copy)]
enum Callback {
    FetchEntries,
    FetchChains,
    UpsertEntries,
    InsertChains,
}

impl Callback {
    fn seed(self, index: &Index) -> &[u8] {
        match self {
            Callback::FetchEntries => index.fetch_entries_key.as_slice(),
            Callback::FetchChains => index.fetch_chains_key.as_slice(),
            Callback::UpsertEntries => index.upsert_entries_key.as_slice(),
            Callback::InsertChains => index.insert_chains_key.as_slice(),
        }
    }
}

/// Resolve the index and strip the signature / 查找索引并校验签名
async fn verified(
    state: &AppState,
    public_id: &str,
    body: &[u8],
    callback: Callback,
) -> Result<(Index, Vec<u8>)> {
    let index = state.cached_index(public_id).await?;
    let data = check_body_signature(body, &index.public_id, callback.seed(&index), unix_now())?;
    Ok((index, data))
}

fn octet_stream(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response()
}

async fn fetch(state: &AppState, public_id: &str, body: &[u8], table: Table) -> Result<Response> {
    let callback = match table {
        Table::Entries => Callback::FetchEntries,
        Table::Chains => Callback::FetchChains,
    };
    let (index, data) = verified(state, public_id, body, callback).await?;
    let uids = codec::deserialize_uid_set(&data)?;

    let logged_uids = state.request_log.as_ref().map(|_| uids.clone());
    let found = state.indexes.fetch(&index, table, uids).await?;

    let response = codec::serialize_encrypted_table(&found);

    if let (Some(log), Some(uids)) = (state.request_log.clone(), logged_uids) {
        let recorded = request_log::blocking(log, move |log| log.record(table, &uids, &found)).await;
        if let Err(e) = recorded {
            tracing::warn!("Failed to record fetch_{} request: {}", table.name(), e);
        }
    }

    Ok(octet_stream(response))
}

/// POST /indexes/:public_id/fetch_entries
pub async fn fetch_entries(
    State(state): State<Arc<AppState>>,
    Path(public_id): Path<String>,
    body: Bytes,
) -> Result<Response> {
    fetch(&state, &public_id, &body, Table::Entries).await
}

/// POST /indexes/:public_id/fetch_chains
pub async fn fetch_chains(
    State(state): State<Arc<AppState>>,
    Path(public_id): Path<String>,
    body: Bytes,
) -> Result<Response> {
    fetch(&state, &public_id, &body, Table::Chains).await
}

/// POST /indexes/:public_id/upsert_entries
///
/// Responds with the rejected lines and their current value.
pub async fn upsert_entries(
    State(state): State<Arc<AppState>>,
    Path(public_id): Path<String>,
    body: Bytes,
) -> Result<Response> {
    let (index, data) = verified(&state, &public_id, &body, Callback::UpsertEntries).await?;
    let upsert_data = codec::deserialize_upsert_data(&data)?;

    let rejected = state.indexes.upsert_entries(&index, upsert_data).await?;
    Ok(octet_stream(codec::serialize_encrypted_table(&rejected)))
}

/// POST /indexes/:public_id/insert_chains
pub async fn insert_chains(
    State(state): State<Arc<AppState>>,
    Path(public_id): Path<String>,
    body: Bytes,
) -> Result<Json<()>> {
    let (index, data) = verified(&state, &public_id, &body, Callback::InsertChains).await?;
    let chains = codec::deserialize_encrypted_table(&data)?;

    state.indexes.insert_chains(&index, chains).await?;
    Ok(Json(()))
}
