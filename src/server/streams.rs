use crate::registry::StreamInfo;
use crate::server::{AppError, AppState, Server};
use axum::http::StatusCode;
use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct StreamsResponse {
    pub streams: Vec<StreamInfo>,
}

pub(crate) trait ActiveStreams {
    async fn list_streams(state: State<Arc<AppState>>) -> Json<StreamsResponse>;

    async fn abort_stream(
        state: State<Arc<AppState>>,
        session_id: Path<String>,
    ) -> Result<StatusCode, AppError>;
}

impl ActiveStreams for Server {
    async fn list_streams(State(state): State<Arc<AppState>>) -> Json<StreamsResponse> {
        Json(StreamsResponse {
            streams: state.registry.list(),
        })
    }

    async fn abort_stream(
        State(state): State<Arc<AppState>>,
        Path(session_id): Path<String>,
    ) -> Result<StatusCode, AppError> {
        if state.registry.abort(&session_id) {
            info!("Stream for session {} aborted by request", session_id);
            Ok(StatusCode::NO_CONTENT)
        } else {
            Err(AppError::NotFound(format!(
                "No active stream for session {}",
                session_id
            )))
        }
    }
}
