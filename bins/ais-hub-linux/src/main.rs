use ais_core::{HubSettings, IngestSink, MemoryStore, PendingSet, StatisticsCollector};
use ais_providers::AnySource;
use ais_server::{
    wait_for_store, DispatchLoop, ExpiryPolicy, HubConfig, MemoryDurableStore,
    PersistenceScheduler, SubscriberHub,
};
use ais_web::{create_router, ServerInfo, WebState};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,ais_server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("AIS hub starting...");

    let settings = HubSettings::from_env()?;
    let shutdown = CancellationToken::new();

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, shutting down...");
            }
            shutdown.cancel();
        });
    }

    // Shared state
    let state = Arc::new(MemoryStore::new(settings.store.ttl_chrono()));
    let pending = Arc::new(PendingSet::new());
    let stats = Arc::new(StatisticsCollector::new());
    let sink = IngestSink::new(state.clone(), pending, stats.clone());
    let durable = Arc::new(MemoryDurableStore::new(settings.store.track_capacity));

    wait_for_store(
        durable.as_ref(),
        settings.store.startup_retry_delay,
        &shutdown,
    )
    .await?;

    let mut tasks = Vec::new();

    // Statistics rate ticker
    {
        let stats = stats.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => stats.update_rate(),
                }
            }
        }));
    }

    // Persistence
    let scheduler = Arc::new(PersistenceScheduler::new(
        &sink,
        durable.clone(),
        settings.persistence.clone(),
        settings.store.write_timeout,
    ));
    tasks.push(tokio::spawn(scheduler.run(shutdown.clone())));

    // Real-time hub and dispatch
    let hub = Arc::new(SubscriberHub::new(
        HubConfig::from_settings(&settings.dispatch),
        state.clone(),
        stats.clone(),
    ));
    {
        let hub = hub.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = hub.run(shutdown).await {
                tracing::error!("WebSocket hub error: {}", e);
            }
        }));
    }

    let dispatch = DispatchLoop::new(
        durable.clone(),
        state.clone(),
        hub,
        stats.clone(),
        settings.dispatch.chunk_size,
        settings.dispatch.tick,
    );
    {
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move { dispatch.run(shutdown).await }));
    }

    // Expiry
    let expiry = ExpiryPolicy::new(
        durable.clone(),
        state.clone(),
        stats.clone(),
        settings.store.sweep_interval,
    );
    {
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move { expiry.run(shutdown).await }));
    }

    // HTTP query surface
    let web_state = Arc::new(WebState::new(
        durable.clone(),
        stats.clone(),
        settings.http.clone(),
        ServerInfo {
            name: settings.dispatch.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ws_addr: settings.dispatch.bind_addr,
        },
    ));
    {
        let addr = settings.http.bind_addr;
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = start_http_server(addr, web_state, shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        }));
    }

    // Upstream sources last, once everything downstream is running
    let sources = AnySource::all(&settings, &sink);
    if sources.is_empty() {
        tracing::warn!("No upstream sources configured");
    }
    for source in sources {
        let shutdown = shutdown.clone();
        tracing::info!(tag = source.tag(), "starting source");
        tasks.push(tokio::spawn(async move { source.run(shutdown).await }));
    }

    tracing::info!("AIS hub ready");
    tracing::info!("   WebSocket: ws://{}", settings.dispatch.bind_addr);
    tracing::info!("   HTTP API:  http://{}/api/vessels", settings.http.bind_addr);

    shutdown.cancelled().await;
    for result in join_all(tasks).await {
        if let Err(e) = result {
            tracing::error!("task failed: {}", e);
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Start the HTTP API server
async fn start_http_server(
    addr: std::net::SocketAddr,
    state: Arc<WebState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
