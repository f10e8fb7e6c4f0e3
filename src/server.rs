use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::block_in_place;
use tower_http::limit::RequestBodyLimitLayer;

use crate::config::Config;
use crate::embedder::{FaceEmbedder, OnnxEmbedder};
use crate::error::MatchError;
use crate::matcher::{self, RankedMatch};
use crate::publisher::{AnalysisRecord, HttpPublisher, ResultPublisher};
use crate::store::{HttpReferenceStore, ReferenceStore};

/// Shared application state: configuration plus the three collaborator
/// seams. The embedder sits behind a mutex since inference needs `&mut`.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn ReferenceStore>,
    pub publisher: Arc<dyn ResultPublisher>,
    pub embedder: Mutex<Box<dyn FaceEmbedder>>,
}

#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub results: Vec<RankedMatch>,
}

/// Build the router. Kept separate from `serve` so tests can drive it with
/// stub collaborators.
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/analyze", post(analyze_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::disable())
        // Uploads are capped at 10M.
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024))
        .with_state(state)
}

/// Start the HTTP server and block until shutdown.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let store = Arc::new(HttpReferenceStore::new(client.clone(), config.store.clone()));
    let publisher = Arc::new(HttpPublisher::new(client, config.store.clone()));
    let embedder = OnnxEmbedder::new(&config.models)?;

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState {
        config,
        store,
        publisher,
        embedder: Mutex::new(Box::new(embedder)),
    });
    let app = create_app(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// One analysis request: multipart image (+ optional user id), optional
/// `num_results` query parameter. Embedding and store errors abort the
/// request; persistence failures only get logged.
async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    mut multipart: Multipart,
) -> Result<Json<AnalysisResponse>, MatchError> {
    let num_results = match params.get("num_results") {
        Some(raw) => raw.parse::<usize>().map_err(|_| {
            MatchError::Validation(format!(
                "num_results must be a non-negative integer, got {raw:?}"
            ))
        })?,
        None => state.config.default_results,
    };

    let mut upload: Option<(Vec<u8>, String)> = None;
    let mut user_id = "anonymous".to_string();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| MatchError::Validation(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let content_type = field.content_type().unwrap_or_default().to_string();
                if !content_type.starts_with("image/") {
                    return Err(MatchError::Validation(
                        "only image files are accepted".into(),
                    ));
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| MatchError::Validation(e.to_string()))?;
                upload = Some((bytes.to_vec(), content_type));
            }
            "user_id" => {
                user_id = field
                    .text()
                    .await
                    .map_err(|e| MatchError::Validation(e.to_string()))?;
            }
            _ => {}
        }
    }

    let (bytes, content_type) =
        upload.ok_or_else(|| MatchError::Validation("missing image file".into()))?;
    let img = image::load_from_memory(&bytes)
        .map_err(|e| MatchError::Validation(format!("could not decode image: {e}")))?;

    let query = {
        let mut embedder = state.embedder.lock().await;
        block_in_place(|| embedder.embed(&img))?
    };

    let results = matcher::rank_matches(
        state.store.as_ref(),
        &query,
        num_results,
        state.config.chunk_size,
    )
    .await?;
    info!("Ranked {} matches for user {}", results.len(), user_id);

    // Persistence is best effort: the user still gets their matches when
    // the storage side is down.
    let photo_url = match state.publisher.upload_photo(&bytes, &content_type).await {
        Ok(url) => Some(url),
        Err(e) => {
            warn!("Photo upload failed: {e}");
            None
        }
    };
    let analysis = AnalysisRecord {
        user_id: user_id.clone(),
        photo_url,
        results: results.clone(),
    };
    if let Err(e) = state.publisher.publish(&user_id, &analysis).await {
        warn!("Failed to persist analysis for {user_id}: {e}");
    }

    Ok(Json(AnalysisResponse { results }))
}
