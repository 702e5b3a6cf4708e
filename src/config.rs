use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub defaults: CompletionDefaults,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UpstreamConfig {
    /// Upper bound on the whole `/v1/models` round trip.
    #[serde(default = "default_models_timeout_secs")]
    pub models_timeout_secs: u64,
    /// Ends a streamed completion when no chunk arrives within this window.
    /// Unset means a silent provider keeps the stream open.
    #[serde(default)]
    pub stream_idle_timeout_secs: Option<u64>,
}

/// Sampling parameters applied when the caller leaves them out.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CompletionDefaults {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_models_timeout_secs() -> u64 {
    8
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    32000
}

fn default_top_p() -> f64 {
    1.0
}

fn default_top_k() -> u32 {
    50
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            defaults: CompletionDefaults::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            models_timeout_secs: default_models_timeout_secs(),
            stream_idle_timeout_secs: None,
        }
    }
}

impl Default for CompletionDefaults {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            top_k: default_top_k(),
        }
    }
}

impl UpstreamConfig {
    pub fn models_timeout(&self) -> Duration {
        Duration::from_secs(self.models_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).context(format!("Failed to read config file: {}", path))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML file, falling back to defaults when the file is absent
    pub fn from_file_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(contents).context("Failed to parse config file as TOML")?;

        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_file() {
        let config = Config::from_file("config.toml");
        assert!(config.is_ok(), "Failed to load config: {:?}", config.err());

        let config = config.unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.upstream.models_timeout_secs, 8);
        assert_eq!(config.upstream.stream_idle_timeout_secs, None);
        assert_eq!(config.defaults, CompletionDefaults::default());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();

        assert_eq!(config.log_level, "info");
        assert_eq!(config.addr(), "127.0.0.1:8787");
        assert_eq!(config.upstream.models_timeout(), Duration::from_secs(8));
        assert_eq!(config.defaults.temperature, 0.7);
        assert_eq!(config.defaults.max_tokens, 32000);
        assert_eq!(config.defaults.top_p, 1.0);
        assert_eq!(config.defaults.top_k, 50);
    }

    #[test]
    fn test_partial_sections_keep_remaining_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 9000

            [upstream]
            stream_idle_timeout_secs = 30

            [defaults]
            max_tokens = 4096
            "#,
        )
        .unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(
            config.upstream.stream_idle_timeout(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.defaults.max_tokens, 4096);
        assert_eq!(config.defaults.top_k, 50);
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let result = Config::from_toml("[server\nport = ");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::from_file_or_default("does-not-exist.toml").unwrap();
        assert_eq!(config.server.port, 8787);
    }
}
