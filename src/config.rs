//! Application configuration and environment variable parsing.
//!
//! This module handles loading configuration settings from the environment (e.g., .env file).
//! It defines the `AppConfig` struct which governs behavior such as the lookback window,
//! GitHub pagination limits, and the credentials for the completion and email services.

use serde::Deserialize;
use std::time::Duration as StdDuration;

/// Application configuration loaded from environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Optional GitHub Personal Access Token for higher rate limits.
    pub github_token: Option<String>,

    /// Base URL of the GitHub REST API.
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,

    /// GitHub user summarized when a request does not name one.
    pub github_username: Option<String>,

    /// Shared secret for the GitDigest login. When unset, nobody can log in.
    pub gitdigest_password: Option<String>,

    /// API key for the chat-completion service.
    pub openai_api_key: Option<String>,

    /// Chat-completion endpoint (OpenAI-compatible).
    #[serde(default = "default_llm_api_url")]
    pub llm_api_url: String,

    /// Model requested from the completion endpoint.
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// API key for the transactional email provider.
    pub resend_api_key: Option<String>,

    /// Resend-compatible endpoint for sending emails.
    #[serde(default = "default_email_api_url")]
    pub email_api_url: String,

    /// Sender used for digest emails.
    #[serde(default = "default_email_from")]
    pub email_from: String,

    /// Lookback window used when a request does not specify one.
    #[serde(default = "default_lookback_days")]
    pub default_lookback_days: i64,

    /// Largest lookback window a request may ask for.
    #[serde(default = "default_max_lookback_days")]
    pub max_lookback_days: i64,

    /// Maximum number of recently pushed repositories inspected per digest.
    #[serde(default = "default_max_repos")]
    pub max_repos: usize,

    /// Hard limit on the number of paginated requests per GitHub listing.
    #[serde(default = "default_max_github_api_pages")]
    pub max_github_api_pages: u32,

    /// Maximum number of concurrent per-repository commit listings.
    #[serde(default = "default_repo_concurrency_limit")]
    pub repo_concurrency_limit: usize,

    /// Timeout for calls to the completion and email services, in seconds.
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,

    /// Whether the auth cookie carries the `Secure` attribute.
    #[serde(default)]
    pub cookie_secure: bool,

    /// Directory holding the built frontend bundle.
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_email_api_url() -> String {
    "https://api.resend.com/emails".to_string()
}

fn default_llm_api_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_email_from() -> String {
    "GitDigest <onboarding@resend.dev>".to_string()
}

fn default_lookback_days() -> i64 {
    7
}

fn default_max_lookback_days() -> i64 {
    30
}

fn default_max_repos() -> usize {
    30
}

fn default_max_github_api_pages() -> u32 {
    3
}

fn default_repo_concurrency_limit() -> usize {
    5
}

fn default_upstream_timeout_secs() -> u64 {
    60
}

fn default_static_dir() -> String {
    "dist".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn upstream_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.upstream_timeout_secs)
    }

    /// Resolves the lookback window for a request, falling back to the default.
    ///
    /// Returns `None` when the requested window is outside `1..=max_lookback_days`.
    pub fn lookback_days(&self, requested: Option<i64>) -> Option<i64> {
        let days = requested.unwrap_or(self.default_lookback_days);
        (1..=self.max_lookback_days).contains(&days).then_some(days)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            github_token: None,
            github_api_url: default_github_api_url(),
            github_username: None,
            gitdigest_password: None,
            openai_api_key: None,
            llm_api_url: default_llm_api_url(),
            llm_model: default_llm_model(),
            resend_api_key: None,
            email_api_url: default_email_api_url(),
            email_from: default_email_from(),
            default_lookback_days: default_lookback_days(),
            max_lookback_days: default_max_lookback_days(),
            max_repos: default_max_repos(),
            max_github_api_pages: default_max_github_api_pages(),
            repo_concurrency_limit: default_repo_concurrency_limit(),
            upstream_timeout_secs: default_upstream_timeout_secs(),
            cookie_secure: false,
            static_dir: default_static_dir(),
        }
    }
}
