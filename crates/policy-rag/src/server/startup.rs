//! REST server startup and shutdown

use anyhow::{anyhow, Result};
use axum::serve;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Settings;
use crate::server::routing::create_router;
use crate::server::state::{initialize_services, AppState};

/// Bind, start loading services in the background and serve until a shutdown signal
#[cfg(not(tarpaulin_include))]
pub async fn start_server(settings: Settings) -> Result<()> {
  let addr = settings.bind;
  let state = AppState::new(settings)?;

  let app = create_router(state.clone())
    .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()));

  let listener = TcpListener::bind(addr).await.map_err(|e| anyhow!("Failed to bind {}: {}", addr, e))?;
  tracing::info!(
    %addr,
    app = %state.settings.app_name,
    search_route = %state.settings.search_route(),
    "Server listening"
  );

  tokio::spawn(initialize_services(state));

  serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| anyhow!("Server error: {}", e))?;

  tracing::info!("Server shutdown gracefully");
  Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::error!(error = %e, "Failed to listen for Ctrl-C");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut signal) => {
        signal.recv().await;
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
    _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
    _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
  }
}
