//! Digest report generation.
//!
//! The aggregated activity is described to a chat-completion service, which answers
//! with an executive summary and per-repository prose. Dates and statistics always
//! come from the local aggregate; the model only contributes text.

use crate::activity::ActivitySummary;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_MESSAGES_PER_REPO: usize = 40;

const SYSTEM_PROMPT: &str = "You are an engineering manager writing a concise activity digest \
for a software developer. Respond with a single JSON object and nothing else.";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DateRange {
    /// First day of the window (YYYY-MM-DD).
    pub start: String,
    /// Last day of the window (YYYY-MM-DD).
    pub end: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DigestStats {
    pub total_commits: usize,
    pub active_repos: usize,
    pub peak_day_commits: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RepoBreakdown {
    pub name: String,
    pub url: String,
    pub commit_count: usize,
    pub summary: String,
    pub highlights: Vec<String>,
}

/// The structured digest returned to clients and rendered into emails.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DigestReport {
    pub date_range: DateRange,
    pub stats: DigestStats,
    pub executive_summary: Vec<String>,
    pub repositories: Vec<RepoBreakdown>,
    #[serde(default = "Utc::now")]
    pub generated_at: DateTime<Utc>,
}

/// What the completion service is asked to return.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionDigest {
    pub executive_summary: Vec<String>,
    pub repositories: Vec<CompletionRepo>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct CompletionRepo {
    pub name: String,
    pub summary: String,
    pub highlights: Vec<String>,
}

/// Produces a digest report from aggregated activity.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, username: &str, activity: &ActivitySummary) -> Result<DigestReport>;
}

/// Builds the user prompt describing `activity`.
pub fn build_prompt(username: &str, activity: &ActivitySummary) -> String {
    let range = date_range(activity);
    let mut prompt = format!(
        "GitHub activity for {username} from {} to {}.\n",
        range.start, range.end
    );
    prompt.push_str(&format!(
        "Total commits: {}. Active repositories: {}.\n",
        activity.total_commits, activity.active_repos
    ));
    if let Some(day) = &activity.busiest_day {
        prompt.push_str(&format!(
            "Busiest day: {} with {} commits.\n",
            day.date, day.commits
        ));
    }

    for repo in &activity.repositories {
        prompt.push_str(&format!(
            "\nRepository {} ({} commits):\n",
            repo.name, repo.commit_count
        ));
        for commit in activity.commits_for(&repo.name).take(MAX_MESSAGES_PER_REPO) {
            prompt.push_str(&format!(
                "- {} {}\n",
                commit.timestamp.format("%Y-%m-%d"),
                commit.message
            ));
        }
        if repo.commit_count > MAX_MESSAGES_PER_REPO {
            prompt.push_str(&format!(
                "- ... and {} more\n",
                repo.commit_count - MAX_MESSAGES_PER_REPO
            ));
        }
    }

    prompt.push_str(
        "\nReturn JSON of the form {\"executiveSummary\": [\"3-5 short bullet points\"], \
\"repositories\": [{\"name\": \"owner/repo\", \"summary\": \"2-3 sentences\", \
\"highlights\": [\"notable changes\"]}]} with one entry per repository listed above.",
    );
    prompt
}

/// Parses the model's reply, tolerating a surrounding Markdown code fence.
pub fn parse_completion(content: &str) -> Result<CompletionDigest> {
    let trimmed = content.trim();
    let json = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(json.trim()).context("Completion did not return a valid digest JSON object")
}

/// Combines the local aggregate with the model's prose into a report.
pub fn assemble_report(
    activity: &ActivitySummary,
    completion: CompletionDigest,
    now: DateTime<Utc>,
) -> DigestReport {
    let mut completion_repos = completion.repositories;

    let repositories = activity
        .repositories
        .iter()
        .map(|repo| {
            let matched = completion_repos
                .iter()
                .position(|c| repo_name_matches(&repo.name, &c.name))
                .map(|i| completion_repos.swap_remove(i));
            let (summary, highlights) = matched
                .map(|c| (c.summary.trim().to_string(), c.highlights))
                .unwrap_or_default();

            RepoBreakdown {
                name: repo.name.clone(),
                url: repo.url.clone(),
                commit_count: repo.commit_count,
                summary,
                highlights: highlights
                    .into_iter()
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty())
                    .collect(),
            }
        })
        .collect();

    DigestReport {
        date_range: date_range(activity),
        stats: DigestStats {
            total_commits: activity.total_commits,
            active_repos: activity.active_repos,
            peak_day_commits: activity.peak_day_commits(),
        },
        executive_summary: completion
            .executive_summary
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        repositories,
        generated_at: now,
    }
}

fn date_range(activity: &ActivitySummary) -> DateRange {
    DateRange {
        start: activity.since.format("%Y-%m-%d").to_string(),
        end: activity.until.format("%Y-%m-%d").to_string(),
    }
}

/// Accepts either `owner/repo` or the bare repository name, case-insensitively.
fn repo_name_matches(full_name: &str, candidate: &str) -> bool {
    let candidate = candidate.trim();
    let short = full_name.rsplit('/').next().unwrap_or(full_name);
    full_name.eq_ignore_ascii_case(candidate) || short.eq_ignore_ascii_case(candidate)
}

/// Summarizer backed by an OpenAI-compatible chat-completion endpoint.
pub struct OpenAiSummarizer {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiSummarizer {
    pub fn new(
        api_url: String,
        api_key: Option<String>,
        model: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url,
            api_key,
            model,
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.3,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
        });

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Completion API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing message content"))
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, username: &str, activity: &ActivitySummary) -> Result<DigestReport> {
        let prompt = build_prompt(username, activity);
        tracing::debug!(username, prompt_len = prompt.len(), model = %self.model, "Requesting digest completion");

        let content = self.complete(&prompt).await?;
        let completion = parse_completion(&content)?;

        Ok(assemble_report(activity, completion, Utc::now()))
    }
}
