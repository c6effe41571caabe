use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};

const PER_PAGE: u8 = 100;

/// A single commit authored by the digest user.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    /// Full repository name (e.g., "octocat/hello-world").
    pub repo: String,
    pub repo_url: String,
    pub sha: String,
    pub timestamp: DateTime<Utc>,
    /// First line of the commit message.
    pub message: String,
    pub author: String,
}

/// Anything that can list a user's commits for a time window.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    async fn fetch_commits(
        &self,
        username: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<CommitRecord>>;
}

#[derive(Debug, Deserialize)]
struct ApiRepo {
    full_name: String,
    html_url: String,
    pushed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ApiCommit {
    sha: String,
    commit: ApiCommitDetail,
}

#[derive(Debug, Deserialize)]
struct ApiCommitDetail {
    message: String,
    author: Option<ApiCommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct ApiCommitAuthor {
    name: Option<String>,
    date: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct RepoListParams {
    sort: &'static str,
    per_page: u8,
    page: u32,
}

#[derive(Serialize)]
struct CommitListParams<'a> {
    author: &'a str,
    since: String,
    until: String,
    per_page: u8,
    page: u32,
}

#[derive(Clone)]
pub struct GitHubClient {
    octocrab: Octocrab,
    max_pages: u32,
    max_repos: usize,
    concurrency_limit: usize,
}

impl GitHubClient {
    pub fn new(
        base_uri: &str,
        token: Option<String>,
        max_pages: u32,
        max_repos: usize,
        concurrency_limit: usize,
    ) -> Result<Self> {
        let mut builder = Octocrab::builder().base_uri(base_uri)?;
        if let Some(token) = token {
            builder = builder.personal_token(token);
        }

        Ok(Self {
            octocrab: builder.build()?,
            max_pages: max_pages.max(1),
            max_repos,
            concurrency_limit: concurrency_limit.max(1),
        })
    }

    /// Lists the user's repositories pushed to since `since`, most recent first.
    async fn fetch_active_repos(&self, username: &str, since: DateTime<Utc>) -> Result<Vec<ApiRepo>> {
        let route = format!("/users/{username}/repos");
        let mut repos = Vec::new();

        for page in 1..=self.max_pages {
            let params = RepoListParams {
                sort: "pushed",
                per_page: PER_PAGE,
                page,
            };
            let batch: Vec<ApiRepo> = match self.octocrab.get(&route, Some(&params)).await {
                Ok(batch) => batch,
                Err(e) if is_not_found(&e) => bail!("GitHub user '{username}' not found"),
                Err(e) => return Err(e.into()),
            };
            let batch_len = batch.len();

            // Sorted by push date, so the first stale repo ends the listing.
            let mut reached_cutoff = false;
            for repo in batch {
                if repo.pushed_at.is_some_and(|pushed| pushed >= since) {
                    repos.push(repo);
                } else {
                    reached_cutoff = true;
                    break;
                }
            }

            if reached_cutoff || batch_len < PER_PAGE as usize {
                break;
            }
            if page == self.max_pages {
                tracing::warn!(
                    username,
                    max_pages = self.max_pages,
                    "Hit max_github_api_pages while listing repositories. Data may be incomplete."
                );
            }
        }

        repos.truncate(self.max_repos);
        Ok(repos)
    }

    /// Lists the commits `username` authored in one repository within the window.
    async fn fetch_repo_commits(
        &self,
        repo: &ApiRepo,
        username: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<CommitRecord>> {
        let route = format!("/repos/{}/commits", repo.full_name);
        let mut commits = Vec::new();

        for page in 1..=self.max_pages {
            let params = CommitListParams {
                author: username,
                since: since.to_rfc3339(),
                until: until.to_rfc3339(),
                per_page: PER_PAGE,
                page,
            };

            let batch: Vec<ApiCommit> = match self.octocrab.get(&route, Some(&params)).await {
                Ok(batch) => batch,
                Err(e) if is_empty_repository(&e) => {
                    tracing::debug!(repo = %repo.full_name, "Skipping empty repository");
                    return Ok(commits);
                }
                Err(e) => return Err(e.into()),
            };
            let batch_len = batch.len();

            commits.extend(batch.into_iter().filter_map(|c| to_record(c, repo, username)));

            if batch_len < PER_PAGE as usize {
                break;
            }
            if page == self.max_pages {
                tracing::warn!(
                    repo = %repo.full_name,
                    max_pages = self.max_pages,
                    "Hit max_github_api_pages while listing commits. Data may be incomplete."
                );
            }
        }

        Ok(commits)
    }
}

#[async_trait]
impl ActivitySource for GitHubClient {
    async fn fetch_commits(
        &self,
        username: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<CommitRecord>> {
        let repos = self.fetch_active_repos(username, since).await?;
        tracing::debug!(username, repos = repos.len(), "Listing commits for active repositories");

        let per_repo: Vec<Vec<CommitRecord>> = stream::iter(repos)
            .map(|repo| async move { self.fetch_repo_commits(&repo, username, since, until).await })
            .buffered(self.concurrency_limit)
            .try_collect()
            .await?;

        Ok(per_repo.into_iter().flatten().collect())
    }
}

fn to_record(commit: ApiCommit, repo: &ApiRepo, username: &str) -> Option<CommitRecord> {
    let author = commit.commit.author?;
    let timestamp = author.date?;
    let message = commit
        .commit
        .message
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    Some(CommitRecord {
        repo: repo.full_name.clone(),
        repo_url: repo.html_url.clone(),
        sha: commit.sha,
        timestamp,
        message,
        author: author.name.unwrap_or_else(|| username.to_string()),
    })
}

fn github_message_contains(error: &octocrab::Error, needle: &str) -> bool {
    match error {
        octocrab::Error::GitHub { source, .. } => source.message.to_lowercase().contains(needle),
        _ => false,
    }
}

fn is_empty_repository(error: &octocrab::Error) -> bool {
    github_message_contains(error, "repository is empty")
}

fn is_not_found(error: &octocrab::Error) -> bool {
    github_message_contains(error, "not found")
}

/// Turns a GitHub error into a message fit for the API response.
pub fn describe_error(error: &anyhow::Error) -> String {
    if let Some(octocrab::Error::GitHub { source, .. }) = error.downcast_ref::<octocrab::Error>() {
        let message = source.message.to_lowercase();
        if message.contains("rate limit") {
            return "GitHub rate limit exceeded".to_string();
        }
        if message.contains("not found") {
            return "GitHub resource not found".to_string();
        }
        return format!("GitHub API error: {}", source.message);
    }
    format!("Failed to fetch GitHub activity: {error}")
}

/// Trims and validates a GitHub login. Logins are alphanumerics and hyphens.
pub fn normalize_username(raw: &str) -> Option<String> {
    let username = raw.trim();
    let valid = !username.is_empty()
        && username.len() <= 39
        && username.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    valid.then(|| username.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_server;
    use axum::{
        extract::{Path, Query, State},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::get,
        Json, Router,
    };
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn repo() -> ApiRepo {
        ApiRepo {
            full_name: "octocat/hello-world".to_string(),
            html_url: "https://github.com/octocat/hello-world".to_string(),
            pushed_at: None,
        }
    }

    #[test]
    fn test_normalize_username() {
        assert_eq!(normalize_username("  octocat "), Some("octocat".to_string()));
        assert_eq!(normalize_username("some-user42"), Some("some-user42".to_string()));
        assert_eq!(normalize_username(""), None);
        assert_eq!(normalize_username("../etc"), None);
        assert_eq!(normalize_username("a/b"), None);
        assert_eq!(normalize_username(&"x".repeat(40)), None);
    }

    #[test]
    fn test_to_record_keeps_first_line() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let commit = ApiCommit {
            sha: "abc123".to_string(),
            commit: ApiCommitDetail {
                message: "Fix login redirect\n\nLonger explanation".to_string(),
                author: Some(ApiCommitAuthor {
                    name: None,
                    date: Some(date),
                }),
            },
        };

        let record = to_record(commit, &repo(), "octocat").unwrap();
        assert_eq!(record.message, "Fix login redirect");
        assert_eq!(record.author, "octocat");
        assert_eq!(record.timestamp, date);
        assert_eq!(record.repo, "octocat/hello-world");
    }

    #[test]
    fn test_to_record_requires_date() {
        let commit = ApiCommit {
            sha: "abc123".to_string(),
            commit: ApiCommitDetail {
                message: "No date".to_string(),
                author: Some(ApiCommitAuthor {
                    name: Some("Octo".to_string()),
                    date: None,
                }),
            },
        };
        assert!(to_record(commit, &repo(), "octocat").is_none());
    }

    #[test]
    fn test_commit_payload_deserializes() {
        let json = serde_json::json!({
            "sha": "deadbeef",
            "html_url": "https://github.com/octocat/hello-world/commit/deadbeef",
            "commit": {
                "message": "Initial commit",
                "author": { "name": "Octo Cat", "email": "o@c.com", "date": "2024-03-01T10:00:00Z" }
            }
        });
        let commit: ApiCommit = serde_json::from_value(json).unwrap();
        assert_eq!(commit.sha, "deadbeef");
        assert_eq!(commit.commit.author.unwrap().name.as_deref(), Some("Octo Cat"));
    }

    #[test]
    fn test_describe_error_generic() {
        let err = anyhow::anyhow!("connection reset");
        assert_eq!(
            describe_error(&err),
            "Failed to fetch GitHub activity: connection reset"
        );
    }

    #[derive(Clone, Default)]
    struct FakeGitHub {
        repo_listings: Arc<AtomicUsize>,
        commit_listings: Arc<AtomicUsize>,
    }

    fn github_error(status: StatusCode, message: &str) -> Response {
        let body = json!({ "message": message, "documentation_url": "https://docs.github.com/rest" });
        (status, Json(body)).into_response()
    }

    fn repo_json(full_name: &str, pushed_at: DateTime<Utc>) -> serde_json::Value {
        json!({
            "full_name": full_name,
            "html_url": format!("https://github.com/{full_name}"),
            "pushed_at": pushed_at.to_rfc3339(),
        })
    }

    async fn user_repos(
        State(fake): State<FakeGitHub>,
        Path(user): Path<String>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        fake.repo_listings.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        match user.as_str() {
            "me" => Json(json!([
                repo_json("me/full", now - Duration::days(1)),
                repo_json("me/empty", now - Duration::days(2)),
                repo_json("me/stale", now - Duration::days(90)),
            ]))
            .into_response(),
            "gone" => Json(json!([repo_json("gone/deleted", now - Duration::days(1))])).into_response(),
            "busy" => {
                let page = params.get("page").cloned().unwrap_or_default();
                let repos: Vec<_> = (0..100)
                    .map(|i| repo_json(&format!("busy/p{page}-{i}"), now - Duration::hours(1)))
                    .collect();
                Json(repos).into_response()
            }
            _ => github_error(StatusCode::NOT_FOUND, "Not Found"),
        }
    }

    async fn repo_commits(
        State(fake): State<FakeGitHub>,
        Path((owner, repo)): Path<(String, String)>,
    ) -> Response {
        fake.commit_listings.fetch_add(1, Ordering::SeqCst);
        match (owner.as_str(), repo.as_str()) {
            ("me", "full") => Json(json!([{
                "sha": "s1",
                "commit": {
                    "message": "hello\n\nmore detail",
                    "author": { "name": "Me", "date": (Utc::now() - Duration::hours(1)).to_rfc3339() }
                }
            }]))
            .into_response(),
            ("me", "empty") => github_error(StatusCode::CONFLICT, "Git Repository is empty."),
            ("gone", "deleted") => github_error(StatusCode::NOT_FOUND, "Not Found"),
            _ => github_error(StatusCode::INTERNAL_SERVER_ERROR, "unexpected commit listing"),
        }
    }

    async fn fake_github() -> (String, FakeGitHub) {
        let fake = FakeGitHub::default();
        let app = Router::new()
            .route("/users/{user}/repos", get(user_repos))
            .route("/repos/{owner}/{repo}/commits", get(repo_commits))
            .with_state(fake.clone());
        (spawn_server(app).await, fake)
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        (now - Duration::days(7), now)
    }

    #[tokio::test]
    async fn test_fetch_commits_skips_empty_and_stale_repos() {
        let (base, fake) = fake_github().await;
        let client = GitHubClient::new(&base, None, 3, 30, 2).unwrap();
        let (since, until) = window();

        let commits = client.fetch_commits("me", since, until).await.unwrap();

        let found: Vec<_> = commits
            .iter()
            .map(|c| (c.repo.as_str(), c.message.as_str()))
            .collect();
        assert_eq!(found, vec![("me/full", "hello")]);
        assert_eq!(commits[0].repo_url, "https://github.com/me/full");
        // The stale repo ends the listing, so only full and empty are queried.
        assert_eq!(fake.commit_listings.load(Ordering::SeqCst), 2);
        assert_eq!(fake.repo_listings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_commits_honors_max_repos() {
        let (base, fake) = fake_github().await;
        let client = GitHubClient::new(&base, None, 3, 1, 2).unwrap();
        let (since, until) = window();

        let commits = client.fetch_commits("me", since, until).await.unwrap();

        assert_eq!(commits.len(), 1);
        assert_eq!(fake.commit_listings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repo_listing_stops_at_page_cap() {
        let (base, fake) = fake_github().await;
        let client = GitHubClient::new(&base, None, 2, 150, 2).unwrap();
        let (since, _) = window();

        let repos = client.fetch_active_repos("busy", since).await.unwrap();

        assert_eq!(fake.repo_listings.load(Ordering::SeqCst), 2);
        assert_eq!(repos.len(), 150);
        assert_eq!(repos[0].full_name, "busy/p1-0");
        assert_eq!(repos[149].full_name, "busy/p2-49");
    }

    #[tokio::test]
    async fn test_unknown_user_is_reported() {
        let (base, _) = fake_github().await;
        let client = GitHubClient::new(&base, None, 3, 30, 2).unwrap();
        let (since, until) = window();

        let err = client.fetch_commits("ghost", since, until).await.unwrap_err();
        assert_eq!(
            describe_error(&err),
            "Failed to fetch GitHub activity: GitHub user 'ghost' not found"
        );
    }

    #[tokio::test]
    async fn test_missing_repo_is_not_reported_as_missing_user() {
        let (base, _) = fake_github().await;
        let client = GitHubClient::new(&base, None, 3, 30, 2).unwrap();
        let (since, until) = window();

        let err = client.fetch_commits("gone", since, until).await.unwrap_err();
        assert_eq!(describe_error(&err), "GitHub resource not found");
    }
}
