use crate::server::upstream::{MODELS_PATH, upstream_url};
use crate::server::{AppError, AppState, Server};
use axum::http::StatusCode;
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsRequest {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ModelsResponse {
    pub success: bool,
    pub models: Vec<Value>,
    pub message: String,
}

impl ModelsRequest {
    /// Both fields are required; the error names every one that is missing.
    pub fn validate(&self) -> Result<(&str, &str), AppError> {
        let api_url = self.api_url.as_deref().filter(|v| !v.is_empty());
        let api_key = self.api_key.as_deref().filter(|v| !v.is_empty());

        match (api_url, api_key) {
            (Some(url), Some(key)) => Ok((url, key)),
            (url, key) => {
                let missing: Vec<&str> = [("apiUrl", url.is_none()), ("apiKey", key.is_none())]
                    .into_iter()
                    .filter_map(|(name, absent)| absent.then_some(name))
                    .collect();
                Err(AppError::BadRequest(format!(
                    "Missing required fields: {}",
                    missing.join(", ")
                )))
            }
        }
    }
}

/// Translate a failed upstream status into what the caller gets back.
pub fn describe_upstream_status(status: StatusCode) -> (StatusCode, String) {
    let message = match status {
        StatusCode::UNAUTHORIZED => "API key is invalid or expired".to_string(),
        StatusCode::NOT_FOUND => {
            "Models endpoint not found or not supported by this provider".to_string()
        }
        s if s.is_server_error() => "Upstream server error".to_string(),
        s => format!("Upstream request failed with status {}", s.as_u16()),
    };
    (status, message)
}

/// Pull the model list out of a 2xx body, which must carry a `data` array.
pub fn extract_models(body: Value) -> Result<Vec<Value>, AppError> {
    match body {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(models)) => Ok(models),
            _ => Err(malformed()),
        },
        _ => Err(malformed()),
    }
}

fn malformed() -> AppError {
    AppError::Status(
        StatusCode::BAD_GATEWAY,
        "Malformed response from upstream: missing `data` array".to_string(),
    )
}

pub(crate) trait ListModels {
    /// List the models offered by the caller's provider
    async fn list_models(
        state: State<Arc<AppState>>,
        request_as_text: String,
    ) -> Result<Json<ModelsResponse>, AppError>;
}

impl ListModels for Server {
    async fn list_models(
        State(state): State<Arc<AppState>>,
        request_as_text: String,
    ) -> Result<Json<ModelsResponse>, AppError> {
        info!("Received list models request");

        let request: ModelsRequest = serde_json::from_str(&request_as_text).map_err(|e| {
            error!("Failed to parse models request: {}", e);
            AppError::BadRequest(format!("Invalid request body: {}", e))
        })?;
        let (api_url, api_key) = request.validate()?;

        let url = upstream_url(api_url, MODELS_PATH);

        let response = state
            .client
            .get(&url)
            .bearer_auth(api_key)
            .timeout(state.config.upstream.models_timeout())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!("Upstream models request timed out: {}", e);
                    AppError::Status(
                        StatusCode::GATEWAY_TIMEOUT,
                        "Upstream request timed out".to_string(),
                    )
                } else {
                    error!("Failed to send request to upstream API: {}", e);
                    AppError::InternalServerError(
                        "Failed to communicate with upstream API".to_string(),
                    )
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Upstream API returned error: {} - {}", status, error_text);
            let (status, message) = describe_upstream_status(status);
            return Err(AppError::Status(status, message));
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                warn!("Upstream models response timed out: {}", e);
                return AppError::Status(
                    StatusCode::GATEWAY_TIMEOUT,
                    "Upstream request timed out".to_string(),
                );
            }
            error!("Failed to parse upstream models response: {}", e);
            malformed()
        })?;

        let models = extract_models(body)?;

        info!("Successfully processed model request ({} models)", models.len());
        Ok(Json(ModelsResponse {
            success: true,
            message: format!("Found {} models", models.len()),
            models,
        }))
    }
}
