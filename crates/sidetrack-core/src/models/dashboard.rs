//! Dashboard types, computed locally by [`crate::stats`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Streaks {
    pub current: u32,
    pub longest: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct ProjectActivity {
    pub project_id: String,
    pub name: String,
    pub commits: u32,
    pub last_commit_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct RecentCommit {
    pub project_id: String,
    pub project_name: String,
    pub sha: String,
    pub message: String,
    pub committed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_projects: u32,
    pub active_projects: u32,
    pub total_commits: u32,
    pub commits_last_7_days: u32,
    pub streaks: Streaks,
    /// Oldest first, one entry per day including empty days.
    pub daily: Vec<DailyCount>,
    /// Monday-first commit counts.
    pub weekdays: [u32; 7],
    pub by_project: Vec<ProjectActivity>,
    pub recent: Vec<RecentCommit>,
    pub generated_at: DateTime<Utc>,
}

impl DashboardStats {
    /// Name of the weekday with the most commits, if there are any.
    pub fn busiest_weekday(&self) -> Option<&'static str> {
        const NAMES: [&str; 7] = [
            "Monday",
            "Tuesday",
            "Wednesday",
            "Thursday",
            "Friday",
            "Saturday",
            "Sunday",
        ];
        let (index, &max) = self
            .weekdays
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.cmp(b).then(ib.cmp(ia)))?;
        (max > 0).then(|| NAMES[index])
    }
}
