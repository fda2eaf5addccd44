mod config;
mod error;
mod gemini;
mod ingest;
mod models;
mod routes;
mod session;

use axum::{Router, extract::DefaultBodyLimit, routing::{get, post}};
use routes::{
    clear_session, create_session, delete_session, dismiss, download, generate, get_session, index, meta,
    sweep_idle_sessions, upload_data_url, upload_image, AppState,
};
use std::net::SocketAddr;
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};
use tracing_subscriber::{fmt, EnvFilter};

use crate::{config::Config, gemini::GeminiClient};

/// Builds the router. The body limit leaves room for the base64 overhead of
/// data-URL uploads; raw uploads are held to `max_upload_bytes` in the handler.
pub fn app(state: AppState) -> Router {
    let max = state.max_upload_bytes;
    let body_limit = max.saturating_add(max / 3).saturating_add(1024);
    Router::new()
        .route("/", get(index))
        .route("/api/meta", get(meta))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/sessions/:id/image", post(upload_data_url).put(upload_image).delete(clear_session))
        .route("/api/sessions/:id/generate", post(generate))
        .route("/api/sessions/:id/dismiss", post(dismiss))
        .route("/api/sessions/:id/download", get(download))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;
    let gemini = GeminiClient::new(config.gemini.clone());
    tracing::info!(model = gemini.model(), demo = gemini.is_demo(), timeout = ?config.gemini.timeout, "Gemini client ready");

    let state = AppState::new(gemini, config.max_upload_bytes);
    tokio::spawn(sweep_idle_sessions(state.clone(), config.session_ttl));
    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
    }
    tracing::info!("Shutting down");
}
