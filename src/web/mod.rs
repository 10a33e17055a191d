//! HTTP surface: the JSON API, public images and signed archive downloads.

use std::num::NonZeroU16;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::pipeline::PackPipeline;
use crate::storage::LocalBlobStore;

mod api;
mod downloads;
mod prelude;

use api::{generate_handler, generate_pack_handler, prompts_handler, status_handler};
use downloads::signed_download_handler;

#[derive(Clone)]
pub(crate) struct AppState {
    pipeline: PackPipeline,
    packs: Arc<LocalBlobStore>,
}

impl AppState {
    fn new(pipeline: PackPipeline, packs: Arc<LocalBlobStore>) -> Self {
        Self { pipeline, packs }
    }
}

fn create_router(images_dir: &Path, packs_bucket: &str) -> Router<AppState> {
    Router::new()
        .route("/api/generate", post(generate_handler))
        .route("/api/generate/{id}", get(status_handler))
        .route("/api/generate-avatar-pack", post(generate_pack_handler))
        .route("/api/prompts", post(prompts_handler))
        .route(
            &format!("/signed/{packs_bucket}/{{*path}}"),
            get(signed_download_handler),
        )
        .nest_service(
            &format!("/files/{}", crate::constants::IMAGES_BUCKET),
            ServeDir::new(images_dir),
        )
}

/// Serves the API until ctrl-c or a listener failure.
pub async fn setup_server(
    listen_addr: &str,
    port: NonZeroU16,
    pipeline: PackPipeline,
    images: &LocalBlobStore,
    packs: Arc<LocalBlobStore>,
) -> Result<(), anyhow::Error> {
    let app = create_router(images.root(), packs.bucket()).with_state(AppState::new(pipeline, packs));

    let addr = format!("{}:{}", listen_addr, port);
    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Couldn't listen for shutdown signal: {}", err);
        }
        info!("Shutting down");
    };
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("Server error: {}", err);
    }
    Ok(())
}
