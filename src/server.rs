use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::csv_encoder;
use crate::error::Result;
use crate::types::{RelayResponse, UploadResult};
use crate::upload::{HttpUploader, Uploader};
use crate::warehouse::{Mode, Reader};

#[derive(Clone)]
pub struct AppState {
    pub reader: Arc<Reader>,
    pub uploader: Arc<dyn Uploader>,
}

impl AppState {
    pub fn new(reader: Reader, uploader: Arc<dyn Uploader>) -> Self {
        Self {
            reader: Arc::new(reader),
            uploader,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let http = reqwest::Client::new();
        Self::new(
            Reader::from_config(config, http.clone()),
            Arc::new(HttpUploader::from_config(config, http)),
        )
    }
}

/// Query, encode and upload, in that order.
pub async fn run_pipeline(state: &AppState, mode: Mode) -> Result<UploadResult> {
    let result = state.reader.fetch(mode).await?;
    let csv = csv_encoder::encode(&result.schema, &result.rows)?;
    drop(result);
    state.uploader.upload(csv).await
}

async fn relay_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mode = Mode::parse(params.get("mode").map(String::as_str));
    match run_pipeline(&state, mode).await {
        Ok(upload) => {
            if !(200..300).contains(&upload.status_code) {
                warn!(status = upload.status_code, "upload target answered non-2xx");
            }
            (StatusCode::OK, Json(RelayResponse::from(upload))).into_response()
        }
        Err(err) => {
            error!(mode = mode.as_str(), error = %err, "relay failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RelayResponse::Error {
                    error: err.to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(relay_handler))
        .route("/healthz", get(healthz_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
    info!("shutdown requested");
}

pub async fn serve(config: Config) -> std::io::Result<()> {
    if config.token.is_empty() {
        warn!("INHABER_TOKEN is empty; uploads will likely be rejected");
    }
    let addr = config.bind_addr();
    let app = build_router(AppState::from_config(&config));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, table = %config.table, "relay listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}
