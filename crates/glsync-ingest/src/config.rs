//! Run configuration
//!
//! Loaded from the JSON file given with `--config`, then overlaid with
//! environment variables:
//!
//! - `GLSYNC_PRIVATE_TOKEN`: API token
//! - `GLSYNC_API_URL`: API root (default `https://gitlab.com/api/v4`)
//! - `GLSYNC_START_DATE`: initial watermark for streams without a bookmark

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use glsync_common::{CommonError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::client::{ClientConfig, RetryPolicy, DEFAULT_API_URL, DEFAULT_TIMEOUT_SECS};
use crate::state::parse_instant_str;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapConfig {
    #[serde(default)]
    pub private_token: String,

    #[serde(default)]
    pub start_date: String,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Group ids or full paths to sync
    #[serde(default, deserialize_with = "selector_list")]
    pub groups: Vec<String>,

    /// Project ids or full paths to sync
    #[serde(default, deserialize_with = "selector_list")]
    pub projects: Vec<String>,

    /// Per-request timeout in seconds; zero or empty means the default
    #[serde(default, deserialize_with = "timeout_secs")]
    pub request_timeout: Option<f64>,

    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            private_token: String::new(),
            start_date: String::new(),
            api_url: default_api_url(),
            groups: Vec::new(),
            projects: Vec::new(),
            request_timeout: None,
            user_agent: None,
        }
    }
}

impl TapConfig {
    /// Load, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = glsync_common::error::read_json_file(path)?;
        let config = config.merge_env();
        config.validate()?;
        Ok(config)
    }

    /// Overlay `GLSYNC_*` environment variables on top of `self`
    pub fn merge_env(mut self) -> Self {
        if let Ok(token) = std::env::var("GLSYNC_PRIVATE_TOKEN") {
            self.private_token = token;
        }

        if let Ok(url) = std::env::var("GLSYNC_API_URL") {
            self.api_url = url;
        }

        if let Ok(start) = std::env::var("GLSYNC_START_DATE") {
            self.start_date = start;
        }

        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.private_token.trim().is_empty() {
            return Err(CommonError::config("private_token is required"));
        }

        self.start_instant()?;

        Url::parse(&self.api_url)
            .map_err(|e| CommonError::config(format!("api_url '{}' is not a valid URL: {e}", self.api_url)))?;

        if let Some(secs) = self.request_timeout {
            if !secs.is_finite() || secs < 0.0 {
                return Err(CommonError::config(format!(
                    "request_timeout must be a positive number of seconds, got {secs}"
                )));
            }
        }

        Ok(())
    }

    /// Parsed `start_date`
    pub fn start_instant(&self) -> Result<DateTime<Utc>> {
        if self.start_date.trim().is_empty() {
            return Err(CommonError::config("start_date is required"));
        }
        parse_instant_str(&self.start_date).ok_or_else(|| {
            CommonError::config(format!("start_date '{}' is not an RFC 3339 timestamp", self.start_date))
        })
    }

    pub fn timeout(&self) -> Duration {
        match self.request_timeout {
            Some(secs) if secs > 0.0 && secs.is_finite() => Duration::from_secs_f64(secs),
            _ => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            user_agent: self.user_agent.clone().filter(|ua| !ua.trim().is_empty()),
            timeout: self.timeout(),
            retry: RetryPolicy::default(),
            ..ClientConfig::new(self.api_url.clone(), self.private_token.clone())
        }
    }
}

/// Split a selector string on whitespace and commas
pub fn split_selectors(raw: &str) -> Vec<String> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SelectorInput {
    Text(String),
    List(Vec<serde_json::Value>),
    Missing(()),
}

fn selector_list<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match SelectorInput::deserialize(deserializer)? {
        SelectorInput::Text(text) => split_selectors(&text),
        SelectorInput::List(items) => items
            .into_iter()
            .flat_map(|item| match item {
                serde_json::Value::String(s) => split_selectors(&s),
                other => vec![other.to_string()],
            })
            .collect(),
        SelectorInput::Missing(()) => Vec::new(),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimeoutInput {
    Number(f64),
    Text(String),
    Missing(()),
}

fn timeout_secs<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<f64>, D::Error> {
    match TimeoutInput::deserialize(deserializer)? {
        TimeoutInput::Number(n) => Ok(Some(n)),
        TimeoutInput::Text(s) if s.trim().is_empty() => Ok(None),
        TimeoutInput::Text(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid request_timeout '{s}'"))),
        TimeoutInput::Missing(()) => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(json: &str) -> TapConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(r#"{"private_token": "t", "start_date": "2024-01-01T00:00:00Z"}"#);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert!(config.groups.is_empty());
        assert_eq!(config.timeout(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_selectors_split_on_whitespace_and_commas() {
        let config = parse(r#"{"projects": "group/a, group/b  42", "groups": ["ops", 7]}"#);
        assert_eq!(config.projects, vec!["group/a", "group/b", "42"]);
        assert_eq!(config.groups, vec!["ops", "7"]);
    }

    #[test]
    fn test_timeout_forms() {
        assert_eq!(parse(r#"{"request_timeout": "30"}"#).timeout(), Duration::from_secs(30));
        assert_eq!(parse(r#"{"request_timeout": 2.5}"#).timeout(), Duration::from_millis(2500));
        assert_eq!(parse(r#"{"request_timeout": 0}"#).timeout(), Duration::from_secs(300));
        assert_eq!(parse(r#"{"request_timeout": ""}"#).timeout(), Duration::from_secs(300));
        assert!(serde_json::from_str::<TapConfig>(r#"{"request_timeout": "soon"}"#).is_err());
    }

    #[test]
    fn test_validation_failures() {
        let missing_token = parse(r#"{"start_date": "2024-01-01T00:00:00Z"}"#);
        assert!(missing_token.validate().unwrap_err().to_string().contains("private_token"));

        let bad_date = parse(r#"{"private_token": "t", "start_date": "last tuesday"}"#);
        assert!(bad_date.validate().unwrap_err().to_string().contains("start_date"));

        let bad_url = parse(r#"{"private_token": "t", "start_date": "2024-01-01", "api_url": "not a url"}"#);
        assert!(bad_url.validate().unwrap_err().to_string().contains("api_url"));

        let bad_timeout = parse(r#"{"private_token": "t", "start_date": "2024-01-01", "request_timeout": -1}"#);
        assert!(bad_timeout.validate().is_err());
    }

    #[test]
    #[serial_test::serial]
    fn test_env_overrides() {
        std::env::set_var("GLSYNC_PRIVATE_TOKEN", "from-env");
        std::env::set_var("GLSYNC_API_URL", "https://gitlab.internal/api/v4");

        let config = parse(r#"{"private_token": "from-file", "start_date": "2024-01-01"}"#).merge_env();

        std::env::remove_var("GLSYNC_PRIVATE_TOKEN");
        std::env::remove_var("GLSYNC_API_URL");

        assert_eq!(config.private_token, "from-env");
        assert_eq!(config.api_url, "https://gitlab.internal/api/v4");
        assert_eq!(config.start_date, "2024-01-01");
    }

    #[test]
    #[serial_test::serial]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"private_token": "glpat-x", "start_date": "2023-01-01T00:00:00Z", "projects": "1 2", "user_agent": "tap"}}"#
        )
        .unwrap();

        let config = TapConfig::load(file.path()).unwrap();
        let client = config.client_config();
        assert_eq!(client.user_agent.as_deref(), Some("tap"));
        assert_eq!(config.projects, vec!["1", "2"]);
    }
}
