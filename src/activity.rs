use crate::github::CommitRecord;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Commit count for a single calendar day (UTC).
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DayCount {
    /// The day (YYYY-MM-DD).
    pub date: String,
    pub commits: usize,
}

/// Per-repository commit totals.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RepoActivity {
    pub name: String,
    pub url: String,
    pub commit_count: usize,
}

/// A user's commits within a window plus the aggregates derived from them.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub total_commits: usize,
    pub active_repos: usize,
    /// The day with the most commits; ties go to the earliest day.
    pub busiest_day: Option<DayCount>,
    /// Commits per day, ascending by date. Days without commits are omitted.
    pub per_day: Vec<DayCount>,
    /// Ordered by commit count descending, then name.
    pub repositories: Vec<RepoActivity>,
    /// Commits in the window, newest first.
    pub commits: Vec<CommitRecord>,
}

impl ActivitySummary {
    pub fn is_empty(&self) -> bool {
        self.total_commits == 0
    }

    pub fn peak_day_commits(&self) -> usize {
        self.busiest_day.as_ref().map_or(0, |day| day.commits)
    }

    /// Commits belonging to `repo`, newest first.
    pub fn commits_for<'a>(&'a self, repo: &'a str) -> impl Iterator<Item = &'a CommitRecord> + 'a {
        self.commits.iter().filter(move |c| c.repo == repo)
    }
}

/// Aggregates the commits that fall within `[since, until]`.
///
/// Every aggregate depends only on the set of commits, not on their order.
pub fn summarize_activity(
    commits: &[CommitRecord],
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> ActivitySummary {
    let mut in_window: Vec<CommitRecord> = commits
        .iter()
        .filter(|c| c.timestamp >= since && c.timestamp <= until)
        .cloned()
        .collect();
    in_window.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.repo.cmp(&b.repo))
            .then_with(|| a.sha.cmp(&b.sha))
    });

    let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    let mut per_repo: HashMap<&str, (&str, usize)> = HashMap::new();
    for commit in &in_window {
        *per_day.entry(commit.timestamp.date_naive()).or_default() += 1;
        per_repo
            .entry(commit.repo.as_str())
            .or_insert((commit.repo_url.as_str(), 0))
            .1 += 1;
    }

    // Strictly-greater keeps the earliest day on ties since the map is date-ordered.
    let busiest_day = per_day
        .iter()
        .fold(None::<(&NaiveDate, usize)>, |best, (date, &count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((date, count)),
        })
        .map(|(date, commits)| DayCount {
            date: date.format("%Y-%m-%d").to_string(),
            commits,
        });

    let mut repositories: Vec<RepoActivity> = per_repo
        .into_iter()
        .map(|(name, (url, commit_count))| RepoActivity {
            name: name.to_string(),
            url: url.to_string(),
            commit_count,
        })
        .collect();
    repositories.sort_by(|a, b| {
        b.commit_count
            .cmp(&a.commit_count)
            .then_with(|| a.name.cmp(&b.name))
    });

    let per_day = per_day
        .into_iter()
        .map(|(date, commits)| DayCount {
            date: date.format("%Y-%m-%d").to_string(),
            commits,
        })
        .collect();

    ActivitySummary {
        since,
        until,
        total_commits: in_window.len(),
        active_repos: repositories.len(),
        busiest_day,
        per_day,
        repositories,
        commits: in_window,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn commit(repo: &str, sha: &str, day: u32, hour: u32) -> CommitRecord {
        CommitRecord {
            repo: repo.to_string(),
            repo_url: format!("https://github.com/{repo}"),
            sha: sha.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap(),
            message: format!("commit {sha}"),
            author: "octocat".to_string(),
        }
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_summarize_empty() {
        let (since, until) = window();
        let summary = summarize_activity(&[], since, until);

        assert!(summary.is_empty());
        assert_eq!(summary.active_repos, 0);
        assert_eq!(summary.busiest_day, None);
        assert_eq!(summary.peak_day_commits(), 0);
        assert!(summary.per_day.is_empty());
    }

    #[test]
    fn test_summarize_with_data() {
        let (since, until) = window();
        let commits = vec![
            commit("me/api", "a1", 2, 10),
            commit("me/api", "a2", 2, 15),
            commit("me/web", "w1", 3, 9),
            commit("me/api", "a3", 5, 11),
        ];

        let summary = summarize_activity(&commits, since, until);

        assert_eq!(summary.total_commits, 4);
        assert_eq!(summary.active_repos, 2);
        assert_eq!(
            summary.busiest_day,
            Some(DayCount {
                date: "2024-01-02".to_string(),
                commits: 2
            })
        );
        assert_eq!(summary.per_day.len(), 3);
        assert_eq!(summary.repositories[0].name, "me/api");
        assert_eq!(summary.repositories[0].commit_count, 3);
        assert_eq!(summary.repositories[1].name, "me/web");
        assert_eq!(summary.commits[0].sha, "a3");
        assert_eq!(summary.commits_for("me/web").count(), 1);
    }

    #[test]
    fn test_summarize_filters_window() {
        let (since, until) = window();
        let commits = vec![
            commit("me/api", "old", 1, 0),
            commit("me/api", "new", 9, 23),
            CommitRecord {
                timestamp: Utc.with_ymd_and_hms(2023, 12, 31, 23, 0, 0).unwrap(),
                ..commit("me/api", "before", 1, 0)
            },
            CommitRecord {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 1).unwrap(),
                ..commit("me/api", "after", 1, 0)
            },
        ];

        let summary = summarize_activity(&commits, since, until);
        assert_eq!(summary.total_commits, 2);
    }

    #[test]
    fn test_busiest_day_tie_prefers_earliest() {
        let (since, until) = window();
        let commits = vec![
            commit("me/web", "w1", 6, 9),
            commit("me/api", "a1", 4, 9),
        ];

        let summary = summarize_activity(&commits, since, until);
        assert_eq!(summary.busiest_day.unwrap().date, "2024-01-04");
    }

    #[test]
    fn test_aggregates_invariant_to_order() {
        let (since, until) = window();
        let commits = vec![
            commit("me/api", "a1", 2, 10),
            commit("me/web", "w1", 3, 9),
            commit("me/web", "w2", 3, 12),
            commit("me/cli", "c1", 7, 8),
            commit("me/api", "a2", 7, 18),
        ];
        let mut reversed = commits.clone();
        reversed.reverse();
        let mut rotated = commits.clone();
        rotated.rotate_left(2);

        let base = summarize_activity(&commits, since, until);
        for variant in [reversed, rotated] {
            let other = summarize_activity(&variant, since, until);
            assert_eq!(other.total_commits, base.total_commits);
            assert_eq!(other.active_repos, base.active_repos);
            assert_eq!(other.busiest_day, base.busiest_day);
            assert_eq!(other.per_day, base.per_day);
            assert_eq!(other.repositories, base.repositories);
            assert_eq!(other.commits, base.commits);
        }
    }
}
