//! Client configuration from the environment

use crate::state_machine::SessionContext;
use crate::text::MergeOptions;
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.v0.dev/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Connection and behaviour settings for the chat API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Team or user scope, sent as `x-scope`
    pub scope: Option<String>,
    /// Model id for new turns
    pub model: Option<String>,
    /// Log request and frame details
    pub debug: bool,
    /// Idle read timeout for streams and total timeout for fetches
    pub timeout: Duration,
    pub merge_separate_words: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            scope: None,
            model: None,
            debug: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            merge_separate_words: false,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or blank values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let timeout = match get("V0_TIMEOUT_SECS").map(|v| v.parse::<u64>()) {
            Some(Ok(secs)) if secs > 0 => Duration::from_secs(secs),
            Some(_) => {
                tracing::warn!("Ignoring invalid V0_TIMEOUT_SECS, using {DEFAULT_TIMEOUT_SECS}s");
                defaults.timeout
            }
            None => defaults.timeout,
        };

        Self {
            api_key: get("V0_API_KEY"),
            base_url: get("V0_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            scope: get("V0_SCOPE"),
            model: get("V0_MODEL"),
            debug: get("V0_STREAM_DEBUG").is_some_and(|v| is_truthy(&v)),
            timeout,
            merge_separate_words: get("V0_MERGE_SEPARATE_WORDS").is_some_and(|v| is_truthy(&v)),
        }
    }

    pub fn chats_url(&self) -> String {
        format!("{}/chats", self.base_url)
    }

    pub fn chat_url(&self, chat_id: &str) -> String {
        format!("{}/chats/{chat_id}", self.base_url)
    }

    pub fn messages_url(&self, chat_id: &str) -> String {
        format!("{}/chats/{chat_id}/messages", self.base_url)
    }

    /// Headers sent with every request
    pub fn auth_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        if let Some(key) = &self.api_key {
            headers.insert("Authorization".to_string(), format!("Bearer {key}"));
        }
        if let Some(scope) = &self.scope {
            headers.insert("x-scope".to_string(), scope.clone());
        }
        headers
    }

    pub fn session_context(&self) -> SessionContext {
        SessionContext::new(MergeOptions {
            separate_words: self.merge_separate_words,
        })
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
