mod config;

use clap::Parser as _;
use config::Config;
use modelmux::{
    AppState, build_metrics_layer_and_handle, build_metrics_router, build_router,
    client::create_hyper_client, connection::RouterConfig, traits::Backend,
};
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

#[tokio::main]
#[instrument]
pub async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // RUST_LOG wins over --level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level)),
        )
        .init();

    info!("Starting modelmux with config: {:?}", config);

    let file = match &config.config {
        Some(path) => RouterConfig::from_file(path).await?,
        None => RouterConfig::default(),
    };

    let router = config
        .router_config(file)?
        .into_router(create_hyper_client())
        .map_err(|e| anyhow::anyhow!("Failed to build router from config: {}", e))?;

    if let Err(e) = router.heartbeat().await {
        warn!("Some backends did not answer the startup heartbeat: {}", e);
    }

    let mut serves = JoinSet::new();

    let prometheus_layer = if config.metrics {
        let (prometheus_layer, prometheus_handle) =
            build_metrics_layer_and_handle(config.metrics_prefix.clone());
        let metrics_router = build_metrics_router(prometheus_handle);
        let bind_addr = format!("0.0.0.0:{}", config.metrics_port);
        let listener = TcpListener::bind(&bind_addr).await?;
        serves.spawn(axum::serve(listener, metrics_router).into_future());
        info!("Metrics endpoint enabled on {}", bind_addr);
        Some(prometheus_layer)
    } else {
        info!("Metrics endpoint disabled");
        None
    };

    let backend: Arc<dyn Backend> = Arc::new(router);
    let mut app = build_router(AppState::new(backend));
    if let Some(prometheus_layer) = prometheus_layer {
        app = app.layer(prometheus_layer);
    }

    let listener = TcpListener::bind(&config.listen).await?;
    info!("modelmux listening on {}", config.listen);
    serves.spawn(axum::serve(listener, app).into_future());

    // Either server stopping takes the process down
    if let Some(result) = serves.join_next().await {
        result??;
    }

    Ok(())
}
