//! HTTP routes / HTTP 路由

pub mod callbacks;
pub mod debug;
pub mod indexes;
pub mod server;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::path::Path;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::state::AppState;

/// Build the application router / 构建应用路由
pub fn router(state: Arc<AppState>, server_config: &ServerConfig) -> Router {
    let mut app = Router::new()
        .route("/health", get(server::health_check))
        // 索引管理
        .route("/indexes", get(indexes::list_indexes).post(indexes::create_index))
        .route(
            "/indexes/:public_id",
            get(indexes::get_index).delete(indexes::delete_index),
        )
        // Findex 回调
        .route("/indexes/:public_id/fetch_entries", post(callbacks::fetch_entries))
        .route("/indexes/:public_id/fetch_chains", post(callbacks::fetch_chains))
        .route("/indexes/:public_id/upsert_entries", post(callbacks::upsert_entries))
        .route("/indexes/:public_id/insert_chains", post(callbacks::insert_chains));

    if state.request_log.is_some() {
        tracing::warn!("Request log enabled, never run this configuration in production");
        app = app.merge(debug::routes());
    }

    let static_dir = Path::new(&server_config.static_dir);
    let static_files =
        ServeDir::new(static_dir).not_found_service(ServeFile::new(static_dir.join("index.html")));

    app.fallback_service(static_files)
        .layer(DefaultBodyLimit::max(server_config.body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
