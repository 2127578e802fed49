use std::sync::Arc;

use rider_flow::api;
use rider_flow::channel::ws::WsConnector;
use rider_flow::client::api::HttpRiderApi;
use rider_flow::config::Config;
use rider_flow::error::AppError;
use rider_flow::state::AppState;
use rider_flow::store::session::SessionStore;
use rider_flow::store::FileStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.compact().init();
    }

    let store = Arc::new(FileStore::open(&config.store_path).await?);
    let rider_api = Arc::new(HttpRiderApi::new(
        &config.backend_url,
        config.api_timeout,
        SessionStore::new(store.clone()),
    )?);
    let connector = Arc::new(WsConnector::new(&config.backend_url)?);

    let app_state = AppState::new(&config, store, rider_api, connector).await?;
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    let bind_addr = format!("127.0.0.1:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        backend_url = %config.backend_url,
        store_path = %config.store_path,
        "rider agent started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    shared_state.presence.go_offline().await;
    tracing::info!("rider agent stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
