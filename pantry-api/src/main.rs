//! Serve CSV ingestion, device registration and product records over HTTP.
use axum::Router;
use envconfig::Envconfig;
use eyre::Result;
use tracing::{error, warn};

use pantry_api::config::Config;
use pantry_api::handlers::{add_routes, AppState};
use pantry_common::metrics::setup_metrics_routes;
use pantry_common::store::build_store;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let store = build_store(
        config.store_backend,
        &config.database_url,
        config.max_pg_connections,
    )
    .expect("failed to initialize store");

    // Requests retry the connection, so an unreachable store is not fatal here.
    if let Err(e) = store.ensure_connected().await {
        warn!("store is not reachable yet: {}", e);
    }

    let state = AppState {
        store,
        max_upload_bytes: config.upload_limit(),
    };
    let app = add_routes(Router::new(), state, config.concurrency_limit);
    let app = setup_metrics_routes(app).expect("failed to install metrics recorder");

    match listen(app, config.bind()).await {
        Ok(_) => {}
        Err(e) => error!("failed to start pantry-api http server, {}", e),
    }
}
