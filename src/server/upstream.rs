use crate::server::{AppError, AppState, Server};
use reqwest::{IntoUrl, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::error;

/// Path appended to the provider base URL for chat completions.
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Path appended to the provider base URL for the model listing.
pub const MODELS_PATH: &str = "/v1/models";

/// Join a provider base URL and a fixed endpoint path.
pub fn upstream_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

pub(crate) trait UpstreamIntegration {
    async fn forward_prompt<U, T>(
        state: &AppState,
        api_key: &str,
        url: U,
        json: &T,
    ) -> Result<Response, AppError>
    where
        U: IntoUrl,
        T: Serialize + Sized;

    async fn relay_errors(response: Response) -> Result<axum::response::Response, AppError>;
}

impl UpstreamIntegration for Server {
    async fn forward_prompt<U, T>(
        state: &AppState,
        api_key: &str,
        url: U,
        json: &T,
    ) -> Result<Response, AppError>
    where
        U: IntoUrl,
        T: Serialize + Sized,
    {
        state
            .client
            .post(url)
            .bearer_auth(api_key)
            .header("Content-Type", "application/json")
            .json(&json)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to send request to upstream API: {}", e);
                AppError::InternalServerError(
                    "Failed to communicate with upstream API".to_string(),
                )
            })
    }

    /// Hand a non-success upstream answer back to the caller with the same status.
    ///
    /// JSON bodies pass through untouched; anything else is wrapped as `{"error": ...}`.
    async fn relay_errors(response: Response) -> Result<axum::response::Response, AppError> {
        let status = response.status();
        let body = response.bytes().await.unwrap_or_default();
        error!(
            "Upstream API returned error: {} - {}",
            status,
            String::from_utf8_lossy(&body)
        );

        if serde_json::from_slice::<Value>(&body).is_ok() {
            return Err(AppError::Upstream { status, body });
        }

        let text = String::from_utf8_lossy(&body).trim().to_string();
        let message = if text.is_empty() {
            format!("Upstream request failed with status {}", status.as_u16())
        } else {
            text
        };
        Err(AppError::Status(status, message))
    }
}
