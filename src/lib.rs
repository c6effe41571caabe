pub mod activity;
pub mod auth;
pub mod config;
pub mod email;
pub mod error;
pub mod fetcher;
pub mod github;
pub mod report;

#[cfg(test)]
mod test_support;

use activity::ActivitySummary;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use config::AppConfig;
use email::Mailer;
use error::ApiError;
use github::{ActivitySource, GitHubClient};
use report::{DigestReport, OpenAiSummarizer, Summarizer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

/// Shared application state accessible to all request handlers.
pub struct AppState {
    /// Application configuration loaded from environment variables.
    pub config: AppConfig,
    /// Where commit activity comes from.
    pub source: Arc<dyn ActivitySource>,
    /// Turns activity into a digest report.
    pub summarizer: Arc<dyn Summarizer>,
    /// Delivers digest emails.
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    /// Initializes the application state with the GitHub, completion and email clients.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let source = GitHubClient::new(
            &config.github_api_url,
            config.github_token.clone(),
            config.max_github_api_pages,
            config.max_repos,
            config.repo_concurrency_limit,
        )?;
        let summarizer = OpenAiSummarizer::new(
            config.llm_api_url.clone(),
            config.openai_api_key.clone(),
            config.llm_model.clone(),
            config.upstream_timeout(),
        )?;
        let mailer = email::ResendMailer::new(
            config.email_api_url.clone(),
            config.resend_api_key.clone(),
            config.upstream_timeout(),
        )?;

        Ok(Self::with_services(
            config,
            Arc::new(source),
            Arc::new(summarizer),
            Arc::new(mailer),
        ))
    }

    pub fn with_services(
        config: AppConfig,
        source: Arc<dyn ActivitySource>,
        summarizer: Arc<dyn Summarizer>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            config,
            source,
            summarizer,
            mailer,
        }
    }
}

pub fn create_app(state: Arc<AppState>) -> Router {
    let static_dir = &state.config.static_dir;
    let serve_dir = ServeDir::new(static_dir)
        .not_found_service(ServeFile::new(format!("{static_dir}/index.html")));

    Router::new()
        .route("/api/health", get(health_check))
        .route(auth::AUTH_API_PATH, post(auth::login).delete(auth::logout))
        .route(
            "/api/gitdigest/generate",
            post(generate_report).get(get_activity),
        )
        .route("/api/gitdigest/email", post(send_report_email))
        .fallback_service(serve_dir)
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_auth))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "gitdigest",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    pub username: Option<String>,
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub report: Option<DigestReport>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    pub username: String,
    pub days: i64,
    pub activity: ActivitySummary,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub to: Option<String>,
    pub report: Option<DigestReport>,
}

#[derive(Debug, Serialize)]
pub struct EmailResponse {
    pub success: bool,
    pub id: String,
}

/// Resolves the username and lookback window for a request, applying defaults.
fn resolve_request(config: &AppConfig, request: &GenerateRequest) -> Result<(String, i64), ApiError> {
    let raw = request
        .username
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .or(config.github_username.as_deref())
        .ok_or_else(|| ApiError::bad_request("A GitHub username is required"))?;
    let username = github::normalize_username(raw)
        .ok_or_else(|| ApiError::bad_request("Invalid GitHub username"))?;

    let days = config.lookback_days(request.days).ok_or_else(|| {
        ApiError::bad_request(format!(
            "days must be between 1 and {}",
            config.max_lookback_days
        ))
    })?;

    Ok((username, days))
}

async fn load_activity(
    state: &AppState,
    username: &str,
    days: i64,
) -> Result<ActivitySummary, ApiError> {
    fetcher::fetch_activity(state.source.as_ref(), username, days, Utc::now())
        .await
        .map_err(|e| {
            tracing::error!(username, "Failed to fetch activity: {:#}", e);
            ApiError::internal(github::describe_error(&e))
        })
}

pub async fn generate_report(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let Json(request) = payload?;
    let (username, days) = resolve_request(&state.config, &request)?;

    let activity = load_activity(&state, &username, days).await?;
    if activity.is_empty() {
        tracing::info!(username = %username, days, "No commits in window, skipping report generation");
        return Ok(Json(GenerateResponse {
            report: None,
            message: Some(format!(
                "No commits found for {username} in the last {days} days"
            )),
        }));
    }

    let report = state
        .summarizer
        .summarize(&username, &activity)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to generate report: {e}")))?;

    tracing::info!(
        username = %username,
        repositories = report.repositories.len(),
        "Generated digest report"
    );
    Ok(Json(GenerateResponse {
        report: Some(report),
        message: None,
    }))
}

pub async fn get_activity(
    State(state): State<Arc<AppState>>,
    query: Result<Query<GenerateRequest>, QueryRejection>,
) -> Result<Json<ActivityResponse>, ApiError> {
    let Query(request) = query?;
    let (username, days) = resolve_request(&state.config, &request)?;

    let activity = load_activity(&state, &username, days).await?;
    Ok(Json(ActivityResponse {
        username,
        days,
        activity,
    }))
}

pub async fn send_report_email(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<Json<EmailResponse>, ApiError> {
    let Json(request) = payload?;

    let to = request
        .to
        .as_deref()
        .and_then(email::validate_recipient)
        .ok_or_else(|| ApiError::bad_request("A valid email address is required"))?;
    let report = request
        .report
        .ok_or_else(|| ApiError::bad_request("A report is required"))?;

    let message = email::compose(&report, &state.config.email_from, to);
    let id = state
        .mailer
        .send(&message)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to send email: {e}")))?;

    Ok(Json(EmailResponse { success: true, id }))
}
