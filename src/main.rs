//! Underlords GSI Server
//!
//! Receives game-state pushes from the game client, tracks the live
//! match and fans updates out to WebSocket subscribers.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use underlords_gsi::{
    network::{router, AppState, BroadcastPublisher, SubscriberServer},
    InMemoryStore, LiveMatchEngine, PersistenceWorker, ServerConfig, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env().context("reading configuration")?;
    info!("Underlords GSI Server v{}", VERSION);
    info!(
        quorum = config.engine.quorum,
        owner = ?config.engine.owner,
        "Engine configured"
    );

    let store = InMemoryStore::new();
    let (worker, persistence) = PersistenceWorker::new(Arc::new(store.clone()));
    let worker_handle = worker.spawn();

    let publisher = BroadcastPublisher::default();
    let engine = Arc::new(Mutex::new(LiveMatchEngine::new(
        config.engine.clone(),
        persistence.clone(),
        Arc::new(publisher.clone()),
    )));

    let subscribers = Arc::new(SubscriberServer::new(
        config.ws_addr,
        config.max_subscribers,
        engine.clone(),
        publisher,
    ));
    let ws_task = {
        let subscribers = subscribers.clone();
        tokio::spawn(async move {
            if let Err(e) = subscribers.run().await {
                error!("Subscriber server failed: {}", e);
            }
        })
    };

    let app = router(AppState {
        engine,
        store: Arc::new(store),
        version: config.version.clone(),
    });
    let listener = TcpListener::bind(config.gsi_addr)
        .await
        .with_context(|| format!("binding {}", config.gsi_addr))?;

    info!("Ingest listening on http://{}/upload", config.gsi_addr);
    info!("Subscribers on ws://{}", config.ws_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("serving HTTP")?;

    subscribers.shutdown();
    let _ = ws_task.await;

    match persistence
        .shutdown(worker_handle, config.shutdown_drain_timeout)
        .await
    {
        Some(stats) => info!(
            applied = stats.applied,
            retried = stats.retried,
            dropped = stats.dropped,
            "Persistence drained"
        ),
        None => error!("Persistence did not drain cleanly"),
    }

    Ok(())
}
