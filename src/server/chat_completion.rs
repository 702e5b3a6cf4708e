use crate::config::CompletionDefaults;
use crate::registry::validate_session_id;
use crate::server::upstream::{CHAT_COMPLETIONS_PATH, UpstreamIntegration, upstream_url};
use crate::server::{AppError, AppState, Server};
use crate::sse::{ReframeOptions, reframe};
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Provider credentials resolved by the caller.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub selected_model: Option<String>,
}

/// Credentials after validation, all present and non-empty.
#[derive(Debug, PartialEq)]
pub struct ValidatedSettings<'a> {
    pub api_key: &'a str,
    pub api_url: &'a str,
    pub model: &'a str,
}

fn required<'a>(value: &'a Option<String>, message: &str) -> Result<&'a str, AppError> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AppError::BadRequest(message.to_string())),
    }
}

impl ProviderSettings {
    /// Checks api key, api url and model, in that order.
    pub fn validate(&self) -> Result<ValidatedSettings<'_>, AppError> {
        Ok(ValidatedSettings {
            api_key: required(&self.api_key, "Missing API key")?,
            api_url: required(&self.api_url, "Missing API URL")?,
            model: required(&self.selected_model, "Missing model")?,
        })
    }
}

/// Chat request as sent by the front-end
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub settings: Option<ProviderSettings>,
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub top_k: Option<u32>,
    /// Registers the stream so it can be listed and aborted.
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}

impl ChatRequest {
    /// Streaming unless the caller explicitly asked for `false`.
    pub fn is_stream(&self) -> bool {
        self.stream != Some(false)
    }

    pub fn to_upstream<'a>(
        &'a self,
        model: &'a str,
        defaults: &CompletionDefaults,
    ) -> UpstreamChatRequest<'a> {
        UpstreamChatRequest {
            model,
            messages: &self.messages,
            stream: self.is_stream(),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            top_k: self.top_k.unwrap_or(defaults.top_k),
        }
    }
}

/// Body posted to the provider's `/v1/chat/completions`
#[derive(Debug, Serialize)]
pub struct UpstreamChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Value],
    pub stream: bool,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub top_k: u32,
}

pub(crate) trait ChatCompletions: UpstreamIntegration {
    async fn chat_completions(
        state: State<Arc<AppState>>,
        request_as_text: String,
    ) -> Result<axum::response::Response, AppError>;
}

impl ChatCompletions for Server {
    async fn chat_completions(
        State(state): State<Arc<AppState>>,
        request_as_text: String,
    ) -> Result<axum::response::Response, AppError> {
        // Parsed by hand so malformed bodies get the same `{"error": ...}` shape.
        let mut request: ChatRequest = serde_json::from_str(&request_as_text).map_err(|e| {
            error!("Failed to parse chat request: {}", e);
            AppError::BadRequest(format!("Invalid request body: {}", e))
        })?;

        let provider = request.settings.take().unwrap_or_default();
        let settings = provider.validate()?;

        let is_stream = request.is_stream();
        let session_id = match request.session_id.as_deref() {
            Some(id) if is_stream => {
                validate_session_id(id).map_err(AppError::BadRequest)?;
                Some(id)
            }
            _ => None,
        };

        info!(
            "Received chat completion request for model: {} (stream={})",
            settings.model, is_stream
        );

        let upstream_request = request.to_upstream(settings.model, &state.config.defaults);
        debug!(
            "upstream_request: {}",
            serde_json::to_string(&upstream_request).unwrap_or_default()
        );

        let url = upstream_url(settings.api_url, CHAT_COMPLETIONS_PATH);
        let response =
            Self::forward_prompt(&state, settings.api_key, url, &upstream_request).await?;

        let status = response.status();
        if !status.is_success() {
            return Self::relay_errors(response).await;
        }

        if is_stream {
            let handle = session_id.map(|id| state.registry.register(id));
            if let Some(handle) = &handle {
                debug!("Registered stream for session {}", handle.session_id());
            }
            let options = ReframeOptions {
                idle_timeout: state.config.upstream.stream_idle_timeout(),
                cancel: handle
                    .as_ref()
                    .map(|h| h.cancellation_token())
                    .unwrap_or_else(CancellationToken::new),
            };

            let frames = reframe(response.bytes_stream(), options, handle);

            info!("Streaming chat completion response");
            axum::response::Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-cache")
                .header(header::CONNECTION, "keep-alive")
                .body(Body::from_stream(frames))
                .map_err(|e| {
                    error!("Failed to build streaming response: {}", e);
                    AppError::InternalServerError("Failed to start stream".to_string())
                })
        } else {
            // Non-streaming path: buffer the full response and return it as-is.
            let completion: Value = response.json().await.map_err(|e| {
                error!("Failed to parse upstream response: {}", e);
                AppError::InternalServerError("Failed to parse upstream response".to_string())
            })?;

            info!("Successfully processed chat completion request");
            Ok(Json(completion).into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ChatRequest {
        serde_json::from_str(json).unwrap()
    }

    fn message_of(err: AppError) -> String {
        match err {
            AppError::BadRequest(msg) => msg,
            other => panic!("expected BadRequest, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_reports_first_missing_field() {
        let all_missing = ProviderSettings::default();
        assert_eq!(message_of(all_missing.validate().unwrap_err()), "Missing API key");

        let no_url = ProviderSettings {
            api_key: Some("k".to_string()),
            api_url: None,
            selected_model: Some("m".to_string()),
        };
        assert_eq!(message_of(no_url.validate().unwrap_err()), "Missing API URL");

        let empty_model = ProviderSettings {
            api_key: Some("k".to_string()),
            api_url: Some("https://x".to_string()),
            selected_model: Some(String::new()),
        };
        assert_eq!(message_of(empty_model.validate().unwrap_err()), "Missing model");
    }

    #[test]
    fn test_validate_accepts_complete_settings() {
        let settings = ProviderSettings {
            api_key: Some("k".to_string()),
            api_url: Some("https://x".to_string()),
            selected_model: Some("m".to_string()),
        };

        assert_eq!(
            settings.validate().unwrap(),
            ValidatedSettings {
                api_key: "k",
                api_url: "https://x",
                model: "m",
            }
        );
    }

    #[test]
    fn test_request_settings_use_camel_case() {
        let request = parse(
            r#"{"settings":{"apiKey":"k","apiUrl":"https://x","selectedModel":"m"},"messages":[]}"#,
        );
        let settings = request.settings.unwrap();
        assert_eq!(settings.api_key.as_deref(), Some("k"));
        assert_eq!(settings.api_url.as_deref(), Some("https://x"));
        assert_eq!(settings.selected_model.as_deref(), Some("m"));
    }

    #[test]
    fn test_stream_defaults_to_true() {
        assert!(parse(r#"{"messages":[]}"#).is_stream());
        assert!(parse(r#"{"messages":[],"stream":true}"#).is_stream());
        assert!(parse(r#"{"messages":[],"stream":null}"#).is_stream());
        assert!(!parse(r#"{"messages":[],"stream":false}"#).is_stream());
    }

    #[test]
    fn test_upstream_request_applies_defaults() {
        let request = parse(r#"{"messages":[{"role":"user","content":"hi"}]}"#);
        let upstream = request.to_upstream("m", &CompletionDefaults::default());

        let json = serde_json::to_value(&upstream).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "m",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true,
                "temperature": 0.7,
                "max_tokens": 32000,
                "top_p": 1.0,
                "top_k": 50
            })
        );
    }

    #[test]
    fn test_upstream_request_keeps_caller_values() {
        let request = parse(
            r#"{"messages":[],"stream":false,"temperature":0.2,"max_tokens":256,"top_p":0.9,"top_k":5}"#,
        );
        let upstream = request.to_upstream("m", &CompletionDefaults::default());

        assert!(!upstream.stream);
        assert_eq!(upstream.temperature, 0.2);
        assert_eq!(upstream.max_tokens, 256);
        assert_eq!(upstream.top_p, 0.9);
        assert_eq!(upstream.top_k, 5);
    }

    #[test]
    fn test_messages_are_forwarded_verbatim() {
        let request = parse(
            r#"{"messages":[{"role":"user","content":[{"type":"text","text":"hi"}],"name":"bob"}]}"#,
        );
        let upstream = request.to_upstream("m", &CompletionDefaults::default());

        assert_eq!(
            serde_json::to_value(upstream.messages).unwrap(),
            serde_json::json!([{"role":"user","content":[{"type":"text","text":"hi"}],"name":"bob"}])
        );
    }
}
