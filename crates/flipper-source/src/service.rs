//! HTTP router exposing any `FicSource` to `RemoteFicSource` clients.

use std::io;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use flipper_core::{FicSource, ScoredStory, SourceError};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::wire::{COUNT_PATH, CountResponse, ErrorBody, FETCH_PATH, RetrievalRequest};

#[derive(Clone)]
struct ServiceState {
    source: Arc<dyn FicSource>,
}

/// Retrieval failure rendered as an [`ErrorBody`].
#[derive(Debug)]
struct ServiceError(SourceError);

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            SourceError::InvalidFilter { .. } => StatusCode::BAD_REQUEST,
            SourceError::SourceUnavailable { .. } | SourceError::Store { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (status, Json(ErrorBody::from_error(&self.0))).into_response()
    }
}

/// Router serving retrieval requests against `source`.
pub fn router(source: Arc<dyn FicSource>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(FETCH_PATH, post(fetch_data))
        .route(COUNT_PATH, post(get_count))
        .layer(TraceLayer::new_for_http())
        .with_state(ServiceState { source })
}

/// Serve [`router`] on an already bound listener until the task is dropped.
///
/// # Errors
///
/// Returns an error when the listener fails.
pub async fn serve(listener: TcpListener, source: Arc<dyn FicSource>) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "recommendation service listening");
    }
    axum::serve(listener, router(source).into_make_service()).await
}

async fn health() -> &'static str {
    "ok"
}

async fn fetch_data(
    State(state): State<ServiceState>,
    Json(request): Json<RetrievalRequest>,
) -> Result<Json<Vec<ScoredStory>>, ServiceError> {
    state
        .source
        .fetch_data(&request.filter, &request.user_data)
        .await
        .map(Json)
        .map_err(ServiceError)
}

async fn get_count(
    State(state): State<ServiceState>,
    Json(request): Json<RetrievalRequest>,
) -> Result<Json<CountResponse>, ServiceError> {
    state
        .source
        .get_count(&request.filter, &request.user_data)
        .await
        .map(|count| Json(CountResponse { count }))
        .map_err(ServiceError)
}
