use crate::config::Config;
use crate::registry::StreamRegistry;

pub mod chat_completion;
pub mod list_models;
pub mod streams;
pub mod upstream;

use self::chat_completion::*;
use self::list_models::*;
use self::streams::*;
use axum::{
    Json, Router,
    body::Body,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use bytes::Bytes;
use reqwest::Client;
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub client: Client,
    pub registry: Arc<StreamRegistry>,
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Custom error type for API responses, rendered as `{"error": "<message>"}`
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    InternalServerError(String),
    /// Any other status with a message written for the caller.
    Status(StatusCode, String),
    /// Upstream error body passed through untouched.
    Upstream { status: StatusCode, body: Bytes },
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Status(status, _) => *status,
            AppError::Upstream { status, .. } => *status,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match self {
            AppError::Upstream { body, .. } => {
                return Response::builder()
                    .status(status)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
            }
            AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::InternalServerError(msg)
            | AppError::Status(_, msg) => msg,
        };

        let body = Json(serde_json::json!({ "error": error_message }));

        (status, body).into_response()
    }
}

pub struct Server {
    pub addr: String,
    pub router: Router,
    pub state: Arc<AppState>,
}

impl Server {
    pub fn new(config: &Config) -> Self {
        let client = Client::new();
        let state = AppState {
            config: config.clone(),
            client,
            registry: Arc::new(StreamRegistry::new()),
        };
        let state = Arc::new(state);

        let app = Self::create_router(state.clone());
        let addr = config.addr();

        Self {
            addr,
            router: app,
            state,
        }
    }

    /// Create the Axum router
    fn create_router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/api/chat", post(Self::chat_completions))
            .route("/api/chat/streams", get(Self::list_streams))
            .route("/api/chat/streams/{session_id}", delete(Self::abort_stream))
            .route("/api/models", post(Self::list_models))
            .route("/health", get(health_check))
            .with_state(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_bad_request_renders_flat_error() {
        let response = AppError::BadRequest("Missing API key".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "error": "Missing API key" })
        );
    }

    #[tokio::test]
    async fn test_status_error_keeps_status() {
        let response =
            AppError::Status(StatusCode::GATEWAY_TIMEOUT, "timed out".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body_json(response).await["error"], "timed out");
    }

    #[tokio::test]
    async fn test_upstream_error_is_relayed_verbatim() {
        let body = Bytes::from_static(br#"{"error":{"message":"rate limited","code":429}}"#);
        let response = AppError::Upstream {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: body.clone(),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let relayed = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(relayed, body);
    }

    #[test]
    fn test_server_uses_configured_address() {
        let mut config = Config::default();
        config.server.port = 9100;

        let server = Server::new(&config);
        assert_eq!(server.addr, "127.0.0.1:9100");
        assert!(server.state.registry.is_empty());
    }
}
