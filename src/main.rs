//! HTTP server for the allocation engine.
//!
//! Endpoints: health, ride create/get, match, book, cancel, fare estimate. State lives in
//! an in-memory store, optionally loaded from and saved to `SNAPSHOT_PATH`.

use std::sync::Arc;

use cabpool_engine::{
    api, seed_store, Allocator, AllocatorConfig, FilePersistence, LogAuditSink, MemoryCache,
    MemoryStore, ScenarioConfig, ScenarioGenerator, ServerConfig,
};
use log::{error, info, warn};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    let _ = env_logger::try_init();
    let server = ServerConfig::from_env();
    let config = AllocatorConfig::from_env();

    let persistence = server.snapshot_path.as_ref().map(FilePersistence::new);
    let store = match persistence.as_ref().map(|p| p.load()) {
        Some(Ok(Some(snapshot))) => {
            info!(
                "snapshot loaded cabs={} trips={} requests={}",
                snapshot.cabs.len(),
                snapshot.trips.len(),
                snapshot.requests.len()
            );
            MemoryStore::from_snapshot(snapshot)
        }
        Some(Err(e)) => {
            error!("snapshot unreadable, refusing to start over it error={}", e);
            std::process::exit(1);
        }
        _ => MemoryStore::new(),
    };
    let is_empty = store
        .snapshot()
        .map(|s| s.cabs.is_empty() && s.requests.is_empty())
        .unwrap_or(false);
    if let (Some(seed), true) = (server.demo_seed, is_empty) {
        let scenario = ScenarioGenerator::new(ScenarioConfig {
            seed,
            ..Default::default()
        })
        .scenario();
        match seed_store(&store, &scenario).await {
            Ok((cabs, requests)) => info!(
                "demo scenario seeded seed={} cabs={} requests={}",
                seed,
                cabs.len(),
                requests.len()
            ),
            Err(e) => warn!("demo seeding failed error={}", e),
        }
    }

    let allocator = Arc::new(Allocator::new(
        Arc::new(store.clone()),
        Arc::new(MemoryCache::new()),
        config,
        Arc::new(LogAuditSink),
    ));
    let app = api::create_router(allocator);

    let addr = format!("0.0.0.0:{}", server.port);
    let listener = TcpListener::bind(&addr).await.expect("bind");
    info!("listening on http://{}", addr);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("serve");

    if let Some(persistence) = persistence {
        match store.snapshot() {
            Ok(snapshot) => match persistence.save(&snapshot) {
                Ok(()) => info!("snapshot saved path={}", persistence.path().display()),
                Err(e) => error!("snapshot save failed error={}", e),
            },
            Err(e) => error!("snapshot export failed error={}", e),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("ctrl-c handler unavailable error={}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
