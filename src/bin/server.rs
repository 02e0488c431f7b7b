//! API server: reads settings from the environment, connects the pool and
//! serves the health routes at the root, the API under `/api/v1` and stored
//! files under the storage prefix.

use axum::Router;
use crud_scaffold::{api_routes, common_routes_with_ready, AppConfig, AppState};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::{limit::RequestBodyLimitLayer, services::ServeDir, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("crud_scaffold=info".parse()?))
        .init();

    let config = AppConfig::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;
    let bind_addr = config.bind_addr.clone();
    let max_body_bytes = config.max_body_bytes;
    let state = AppState::new(pool, config);

    let mut app = Router::new()
        .merge(common_routes_with_ready(state.clone()))
        .nest("/api/v1", api_routes(state.clone()));
    let files_prefix = state.config.storage_url.trim_end_matches('/');
    if files_prefix.starts_with('/') && files_prefix.len() > 1 {
        app = app.nest_service(files_prefix, ServeDir::new(state.storage.root()));
    }
    let app = app
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutting down");
}
