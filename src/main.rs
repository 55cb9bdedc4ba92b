use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use ecochat_backend::core::config::AppPaths;
use ecochat_backend::core::logging;
use ecochat_backend::server;
use ecochat_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Values already present in the environment win over `.env`.
    let dotenv = dotenvy::dotenv();

    let paths = Arc::new(AppPaths::new());
    logging::init(&paths);
    if let Ok(path) = dotenv {
        tracing::info!("Loaded environment from {}", path.display());
    }

    let state = AppState::initialize(paths)
        .await
        .context("Failed to initialize application state")?;

    let bind_addr = format!("{}:{}", state.settings.server.host, state.settings.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;
    tracing::info!("Listening on http://{}", addr);

    let app: Router = server::router::router(state.clone());
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
