use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use daily_swipe::clock::SystemDayClock;
use daily_swipe::engine::SessionEngine;
use daily_swipe::remote::HttpChallengeApi;
use daily_swipe::store::SqliteStore;
use daily_swipe::{config, handlers, paths};

#[tokio::main]
async fn main() {
  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "daily_swipe=debug,tower_http=debug".into()),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();

  let settings = config::load_settings().expect("Failed to load configuration");

  let store_path = paths::store_path();
  let store = SqliteStore::open(Path::new(&store_path)).expect("Failed to open engine store");
  tracing::info!("Engine store at {}", store_path);

  let api = HttpChallengeApi::new(&settings.remote).expect("Failed to build challenge service client");
  tracing::info!("Challenge service at {}", settings.remote.base_url);

  let engine = SessionEngine::start(
    Arc::new(store),
    SystemDayClock,
    Arc::new(api),
    settings.engine.clone(),
  )
  .await
  .expect("Failed to start session engine");

  let app = handlers::router(engine.clone());

  let bind_addr = settings.bind_addr();
  let listener = tokio::net::TcpListener::bind(&bind_addr)
    .await
    .unwrap_or_else(|_| panic!("Failed to bind to {}", bind_addr));

  tracing::info!("Engine API running on http://{}", bind_addr);

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Server error");

  if let Err(e) = engine.shutdown().await {
    tracing::error!("Failed to write final engine state: {}", e);
  }
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!("Failed to listen for shutdown signal: {}", e);
    std::future::pending::<()>().await;
  }
  tracing::info!("Shutting down");
}
