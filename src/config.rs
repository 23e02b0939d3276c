//! Runtime configuration.
//!
//! Layered lowest to highest: built-in defaults, optional TOML file,
//! environment variables, command-line flags (applied in `cli`).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ChatError;

pub const ENDPOINT_ENV: &str = "CHAT_ARTIFACTS_ENDPOINT";
pub const SYSTEM_PROMPT_ENV: &str = "CHAT_ARTIFACTS_SYSTEM_PROMPT";

pub const DEFAULT_ENDPOINT: &str = "http://localhost:3001/api/chat/stream";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. When users ask you to \
create code, web pages, or documents, provide complete, well-formatted content that can be rendered.";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Proxy endpoint that relays the model's event stream.
    pub endpoint: String,
    pub system_prompt: String,
    /// TCP connect timeout. The response body has no deadline.
    pub connect_timeout_secs: u64,
    /// Where preview files are written.
    pub preview_dir: PathBuf,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            connect_timeout_secs: 10,
            preview_dir: PathBuf::from("preview"),
            log_filter: "warn".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ChatError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ChatError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Apply `CHAT_ARTIFACTS_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|v| !v.is_empty()) {
            self.endpoint = endpoint;
        }
        if let Some(prompt) = lookup(SYSTEM_PROMPT_ENV).filter(|v| !v.is_empty()) {
            self.system_prompt = prompt;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.preview_dir, PathBuf::from("preview"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str("endpoint = \"http://proxy:8080/api/chat/stream\"\n")
            .expect("parse");
        assert_eq!(config.endpoint, "http://proxy:8080/api/chat/stream");
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(config.log_filter, "warn");
    }

    #[test]
    fn test_full_toml() {
        let toml = r#"
            endpoint = "http://127.0.0.1:9000/stream"
            system_prompt = "Answer in HTML."
            connect_timeout_secs = 3
            preview_dir = "/tmp/out"
            log_filter = "chat_artifacts=debug"
        "#;
        let config = Config::from_toml_str(toml).expect("parse");
        assert_eq!(config.system_prompt, "Answer in HTML.");
        assert_eq!(config.connect_timeout_secs, 3);
        assert_eq!(config.preview_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.log_filter, "chat_artifacts=debug");
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = Config::from_toml_str("connect_timeout_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("chat.toml");
        std::fs::write(&path, "log_filter = \"info\"").expect("write");
        assert_eq!(Config::load(&path).expect("load").log_filter, "info");
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = Config::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ChatError::Io(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_from(|key| match key {
            ENDPOINT_ENV => Some("http://env:1/stream".to_string()),
            SYSTEM_PROMPT_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.endpoint, "http://env:1/stream");
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }
}
