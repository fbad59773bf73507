//! HTTP query service. One endpoint: `GET /?filename=<image>&n=<count>`
//! resolves the image, runs both predictors, ranks the database and
//! responds with the top-n filenames joined by newlines.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::ai::SearchEngine;
use crate::error::{Result, SearchError};
use crate::utilities;

/// Shared state for the service.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SearchEngine>,
    pub image_base_url: String,
    pub cache_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    /// Image to find similar embryos to: a local path or a filename on the
    /// photo server.
    filename: Option<String>,
    /// Number of similar images to return.
    #[serde(default = "default_n")]
    n: usize,
}

fn default_n() -> usize {
    50
}

/// Bind and serve until shutdown.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = Router::new().route("/", get(search)).with_state(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    log::info!("[server] listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> std::result::Result<String, (StatusCode, String)> {
    let Some(filename) = params.filename else {
        return Err((
            StatusCode::BAD_REQUEST,
            "missing 'filename' query parameter".into(),
        ));
    };
    let ranked = run_search(&state, &filename).await.map_err(|e| {
        log::warn!("[server] query '{filename}' failed: {e}");
        (status_for(&e), e.to_string())
    })?;
    log::info!(
        "[server] query '{filename}' ranked {} images, returning {}",
        ranked.len(),
        params.n.min(ranked.len())
    );
    let mut names: Vec<String> = ranked.iter().map(|f| utilities::basename(f)).collect();
    names.truncate(params.n);
    Ok(names.join("\n"))
}

async fn run_search(state: &AppState, filename: &str) -> Result<Vec<String>> {
    let bytes =
        utilities::grab_image(filename, &state.image_base_url, &state.cache_dir).await?;
    // Inference and ranking are synchronous CPU work; keep them off the
    // request executor.
    let engine = Arc::clone(&state.engine);
    tokio::task::spawn_blocking(move || engine.search_bytes(&bytes))
        .await
        .map_err(|e| SearchError::Config(format!("search task aborted: {e}")))?
}

fn status_for(err: &SearchError) -> StatusCode {
    match err {
        SearchError::ImageNotFound(_) => StatusCode::NOT_FOUND,
        SearchError::InvalidImage(_) | SearchError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
