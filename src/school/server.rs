use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::api::{self, AppState, SharedState};
use super::db::{DbHandle, SchoolDb};
use super::storage::LocalStorage;
use crate::config::AppConfig;

/// Room for multipart framing and the other form fields on top of the file.
const BODY_LIMIT_OVERHEAD: usize = 64 * 1024;

/// Build the full application router: API routes plus stored-file serving.
pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let files = format!("/{}/{{*path}}", state.storage.url_prefix());
    let body_limit = state.storage.max_upload_bytes() + BODY_LIMIT_OVERHEAD;

    let mut app = api::api_router()
        .route(&files, get(serve_file))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

async fn serve_file(State(state): State<SharedState>, Path(path): Path<String>) -> Response {
    let Some(full) = state.storage.resolve(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match tokio::fs::read(&full).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&full).first_or_octet_stream();
            ([(header::CONTENT_TYPE, mime.to_string())], Body::from(bytes)).into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(path = %path, error = %e, "failed to read stored file");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Open the database and storage root named by `config`.
pub fn build_state(config: &AppConfig) -> Result<SharedState> {
    if let Some(parent) = config.database.path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    std::fs::create_dir_all(&config.storage.root)
        .with_context(|| format!("Failed to create storage root {}", config.storage.root.display()))?;

    let db = SchoolDb::open(&config.database.path, config.database.busy_timeout())
        .context("Failed to initialize school database")?;
    let storage = LocalStorage::new(
        &config.storage.root,
        &config.server.public_base_url(),
        &config.storage.url_prefix,
        config.storage.max_upload_bytes,
    );
    Ok(Arc::new(AppState {
        db: DbHandle::new(db),
        storage,
        token_ttl_hours: config.auth.token_ttl_hours,
    }))
}

/// Start the API server and run until Ctrl-C.
pub async fn start_server(config: &AppConfig) -> Result<()> {
    let state = build_state(config)?;
    let app = build_router(state, config.server.dev_mode);

    let addr = config.server.address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        %local_addr,
        db = %config.database.path.display(),
        dev_mode = config.server.dev_mode,
        "schoolhouse listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
