//! Alert registered devices about products nearing their expiry date, once a day.
use std::sync::Arc;

use axum::Router;
use chrono::Utc;
use envconfig::Envconfig;
use eyre::Result;
use futures::future::{select, Either};
use tracing::{error, warn};

use health::HealthRegistry;
use pantry_common::metrics::setup_metrics_routes;
use pantry_common::notification::FcmTransport;
use pantry_common::store::build_store;
use pantry_notifier::config::Config;
use pantry_notifier::handlers;
use pantry_notifier::notifier::ExpiryNotifier;
use pantry_notifier::schedule::run_daily;

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

    // Each run retries the connection, so an unreachable store is not fatal here.
    if let Err(e) = store.ensure_connected().await {
        warn!("store is not reachable yet: {}", e);
    }

    let transport = FcmTransport::from_config(
        config.fcm_endpoint.as_deref(),
        config.fcm_access_token.as_deref(),
        config.fcm_request_timeout.0,
    );
    let notifier = Arc::new(ExpiryNotifier::new(
        store,
        Arc::new(transport),
        config.dispatch_concurrency,
    ));

    let liveness = HealthRegistry::new("liveness");
    let heartbeat = config.heartbeat_interval();
    let trigger_liveness = liveness.register("expiry-trigger", heartbeat * 3);

    // The recorder has to be installed before the first run reports anything.
    let app = handlers::app(liveness);
    let app = setup_metrics_routes(app).expect("failed to install metrics recorder");

    if config.run_on_start {
        notifier.run(Utc::now()).await;
    }

    let trigger_loop = Box::pin(run_daily(
        notifier,
        config.notify_at.0,
        trigger_liveness,
        heartbeat,
    ));

    let http_server = Box::pin(listen(app, config.bind()));

    match select(http_server, trigger_loop).await {
        Either::Left((listen_result, _)) => match listen_result {
            Ok(_) => {}
            Err(e) => error!("failed to start pantry-notifier http server, {}", e),
        },
        Either::Right((_, _)) => {
            error!("pantry-notifier trigger loop exited")
        }
    };
}
