//! The upload front-end: `GET /` shows the form, `POST /` stores and separates a file.

pub mod flash;
pub mod handlers;
pub mod page;
pub mod upload;

use std::{path::PathBuf, sync::Arc};

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{config::AppConfig, model::gateway::ModelGateway, pipeline::ProcessOptions};

pub use flash::FlashKey;
pub use handlers::{upload_file, upload_form};

/// State shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ModelGateway>,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub options: ProcessOptions,
    pub flash_key: FlashKey,
}

impl AppState {
    pub fn new(gateway: Arc<ModelGateway>, config: &AppConfig) -> Self {
        Self {
            gateway,
            input_dir: config.input_dir.clone(),
            output_dir: config.output_dir.clone(),
            options: ProcessOptions::from(&config.separation),
            flash_key: FlashKey::new(config.secret_key.as_bytes()),
        }
    }
}

pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(upload_form).post(upload_file))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `router` on an already bound listener until the process stops.
pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "serving upload form");
    axum::serve(listener, router).await
}

pub async fn start_server(addr: &str, state: AppState, max_upload_bytes: usize) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, build_router(state, max_upload_bytes)).await
}
