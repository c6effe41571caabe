use crate::report::DigestReport;
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// An outgoing email.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Sends emails and returns the provider's message id.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<String>;
}

/// Returns the trimmed recipient, or `None` when it cannot be an address.
pub fn validate_recipient(to: &str) -> Option<String> {
    let to = to.trim();
    (!to.is_empty() && to.contains('@')).then(|| to.to_string())
}

pub fn subject(report: &DigestReport) -> String {
    format!(
        "GitDigest: {} to {}",
        report.date_range.start, report.date_range.end
    )
}

/// Builds the full message for `report`.
pub fn compose(report: &DigestReport, from: &str, to: String) -> EmailMessage {
    EmailMessage {
        from: from.to_string(),
        to: vec![to],
        subject: subject(report),
        html: render_html(report),
        text: render_text(report),
    }
}

pub fn render_html(report: &DigestReport) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html><html><body style=\"font-family: -apple-system, Helvetica, Arial, sans-serif; color: #111; max-width: 640px; margin: 0 auto;\">");
    html.push_str(&format!(
        "<h1>GitDigest</h1><p style=\"color: #555;\">{} to {}</p>",
        escape_html(&report.date_range.start),
        escape_html(&report.date_range.end)
    ));
    html.push_str(&format!(
        "<table cellpadding=\"8\"><tr><td><strong>{}</strong><br>commits</td><td><strong>{}</strong><br>active repos</td><td><strong>{}</strong><br>peak day</td></tr></table>",
        report.stats.total_commits, report.stats.active_repos, report.stats.peak_day_commits
    ));

    if !report.executive_summary.is_empty() {
        html.push_str("<h2>Executive summary</h2><ul>");
        for bullet in &report.executive_summary {
            html.push_str(&format!("<li>{}</li>", escape_html(bullet)));
        }
        html.push_str("</ul>");
    }

    for repo in &report.repositories {
        html.push_str(&format!(
            "<h3><a href=\"{}\">{}</a> <span style=\"color: #555; font-weight: normal;\">({} commits)</span></h3>",
            escape_html(&repo.url),
            escape_html(&repo.name),
            repo.commit_count
        ));
        if !repo.summary.is_empty() {
            html.push_str(&format!("<p>{}</p>", escape_html(&repo.summary)));
        }
        if !repo.highlights.is_empty() {
            html.push_str("<ul>");
            for highlight in &repo.highlights {
                html.push_str(&format!("<li>{}</li>", escape_html(highlight)));
            }
            html.push_str("</ul>");
        }
    }

    html.push_str(&format!(
        "<p style=\"color: #999; font-size: 12px;\">Generated {}</p></body></html>",
        report.generated_at.format("%Y-%m-%d %H:%M UTC")
    ));
    html
}

pub fn render_text(report: &DigestReport) -> String {
    let mut text = format!(
        "GitDigest: {} to {}\n\n",
        report.date_range.start, report.date_range.end
    );
    text.push_str(&format!(
        "{} commits, {} active repos, {} on the busiest day\n\n",
        report.stats.total_commits, report.stats.active_repos, report.stats.peak_day_commits
    ));

    if !report.executive_summary.is_empty() {
        text.push_str("Executive summary\n");
        for bullet in &report.executive_summary {
            text.push_str(&format!("- {bullet}\n"));
        }
        text.push('\n');
    }

    for repo in &report.repositories {
        text.push_str(&format!("{} ({} commits)\n{}\n", repo.name, repo.commit_count, repo.url));
        if !repo.summary.is_empty() {
            text.push_str(&format!("{}\n", repo.summary));
        }
        for highlight in &repo.highlights {
            text.push_str(&format!("  * {highlight}\n"));
        }
        text.push('\n');
    }
    text
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Mailer backed by the Resend transactional email API.
pub struct ResendMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl ResendMailer {
    pub fn new(api_url: String, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url,
            api_key,
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, message: &EmailMessage) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("RESEND_API_KEY not set"))?;

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Email API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let id = json
            .get("id")
            .and_then(|id| id.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid email API response: missing id"))?;

        tracing::info!(email_id = id, recipients = message.to.len(), "Sent digest email");
        Ok(id.to_string())
    }
}
