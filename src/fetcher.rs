use crate::activity::{self, ActivitySummary};
use crate::github::ActivitySource;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

/// Fetches a user's commits for the last `days` days and aggregates them.
///
/// This function separates the logic of data retrieval and processing
/// from the HTTP layer.
pub async fn fetch_activity(
    source: &dyn ActivitySource,
    username: &str,
    days: i64,
    now: DateTime<Utc>,
) -> Result<ActivitySummary> {
    let since = now - Duration::days(days);
    let commits = source.fetch_commits(username, since, now).await?;

    let summary = activity::summarize_activity(&commits, since, now);
    tracing::info!(
        username,
        days,
        total_commits = summary.total_commits,
        active_repos = summary.active_repos,
        "Fetched commit activity"
    );

    Ok(summary)
}
