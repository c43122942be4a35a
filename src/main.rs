use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod cache;
mod config;
mod errors;
mod health;
mod messaging;
mod metrics;
mod models;
mod service;
mod store;
mod utils;

#[cfg(test)]
mod testing;

use cache::RedisCache;
use config::Config;
use health::HealthProbe;
use messaging::OrderConsumer;
use service::{CacheAside, OrderService};
use store::PgOrderStore;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Local runs may keep settings in .env; real deployments set the env
    dotenvy::dotenv().ok();

    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_service=debug")),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        app = %config.app_name,
        version = %config.app_version,
        "Starting order service"
    );

    // === 1. Durable store ===
    tracing::info!("Connecting to PostgreSQL...");
    let store = Arc::new(
        PgOrderStore::connect(
            &config.postgres.url,
            config.postgres.max_connections,
            config.postgres.operation_timeout,
        )
        .await?,
    );
    store.ping().await?;

    // === 2. Metrics + cache ===
    let metrics = Arc::new(metrics::Metrics::new()?);
    tracing::info!("Metrics registry created with {} metrics", metrics.registry().gather().len());

    tracing::info!("Connecting to Redis...");
    let redis = Arc::new(
        RedisCache::connect(&config.redis.url, config.redis.operation_timeout, metrics.clone()).await?,
    );

    // === 3. Access service + preload ===
    let aside = CacheAside::new(redis.clone(), config.redis.ttl, metrics.clone());
    tracing::info!(ttl_secs = aside.ttl().as_secs(), "Cache-aside strategy ready");
    let service = Arc::new(
        OrderService::new(store.clone(), aside, metrics.clone())
            .with_preload_concurrency(config.preload_concurrency)
            .with_preload_page_size(config.preload_page_size),
    );

    let report = service.preload().await?;
    tracing::info!(
        total = report.total,
        cached = report.cached,
        failed = report.failed,
        "Cache warmed from store"
    );

    // === 4. Ingestion: workers + Kafka consumer ===
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (pipeline, workers) = messaging::start_workers(
        service.clone(),
        config.ingest.clone(),
        metrics.clone(),
        shutdown_rx.clone(),
    );
    let consumer = OrderConsumer::new(&config.kafka)?;
    let consumer_task = tokio::spawn(consumer.run(pipeline, shutdown_rx));

    // === 5. HTTP server ===
    let probes: Vec<Arc<dyn HealthProbe>> = vec![store.clone() as Arc<dyn HealthProbe>, redis.clone()];
    let state = web::Data::new(api::AppState {
        service: service.clone(),
        metrics: metrics.clone(),
        probes,
        request_timeout: config.http.request_timeout,
        app_name: config.app_name.clone(),
        app_version: config.app_version.clone(),
    });

    tracing::info!(
        "Starting HTTP server on http://{}:{}",
        config.http.host,
        config.http.port
    );
    let server = HttpServer::new(move || App::new().app_data(state.clone()).configure(api::configure))
        .bind((config.http.host.as_str(), config.http.port))?
        .disable_signals()
        .run();
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    // === 6. Run until signalled, then shut down in order ===
    shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    server_handle.stop(true).await;
    match server_task.await {
        Ok(Err(e)) => tracing::error!(error = %e, "HTTP server error"),
        Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
        Ok(Ok(())) => {}
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = consumer_task.await {
        tracing::error!(error = %e, "Kafka consumer task failed");
    }
    workers.join().await;

    store.pool().close().await;
    tracing::info!("Order service stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
