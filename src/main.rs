use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use findex_cloud::{
    api,
    auth::Tenancy,
    config, db, indexes,
    metadata::SqliteMetadata,
    request_log::RequestLog,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "findex_cloud=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration / 加载配置
    let app_config = config::init_config().map_err(anyhow::Error::msg)?;
    tracing::info!("Server will listen on {}:{}", app_config.server.host, app_config.server.port);

    // Create data directory if not exists / 创建数据目录
    let data_dir = app_config.get_data_dir();
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
        tracing::info!("Created data directory: {:?}", data_dir);
    }

    let pool = db::connect(&app_config.get_database_url()).await?;
    db::run_migrations(&pool).await?;

    let indexes = indexes::open_backend(&app_config).await?;

    let tenancy = Tenancy::from_config(&app_config.tenancy)?;
    if tenancy.is_some() {
        tracing::info!("Multi-tenant mode enabled");
    }

    let request_log = app_config
        .request_log
        .enabled
        .then(|| RequestLog::new(app_config.get_request_log_path()));

    let state = Arc::new(
        AppState::new(Arc::new(SqliteMetadata::new(pool)), indexes)
            .with_tenancy(tenancy)
            .with_request_log(request_log),
    );

    let app = api::router(state, &app_config.server);

    if app_config.server.ipv6 {
        let ipv6_addr = format!("[::1]:{}", app_config.server.port);
        match tokio::net::TcpListener::bind(&ipv6_addr).await {
            Ok(listener) => {
                tracing::info!("Server also running at http://{}", ipv6_addr);
                let app = app.clone();
                tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, app).await {
                        tracing::error!("IPv6 listener stopped: {}", e);
                    }
                });
            }
            Err(e) => tracing::warn!("Cannot listen on {}: {}", ipv6_addr, e),
        }
    }

    let bind_addr = app_config.get_bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server running at http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
