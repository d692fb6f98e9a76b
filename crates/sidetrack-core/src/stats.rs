//! Commit statistics for the dashboard.
//!
//! All functions are pure. Days are calendar days in the offset of the `now`
//! argument, so a commit at 23:30 local time counts for that local day even
//! when it is already tomorrow in UTC.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};

use crate::models::{
    Commit, DailyCount, DashboardStats, Project, ProjectActivity, RecentCommit, Streaks,
};

/// Number of commits listed in `DashboardStats::recent`.
pub const RECENT_COMMIT_LIMIT: usize = 10;

/// Default length of the daily activity series.
pub const DEFAULT_DAYS: u32 = 30;

fn local_day(at: DateTime<Utc>, now: &DateTime<FixedOffset>) -> NaiveDate {
    at.with_timezone(&now.timezone()).date_naive()
}

/// Longest daily series `daily_counts` produces.
pub const MAX_DAYS: u32 = 365;

/// One entry per day for the `days` days ending today, oldest first.
/// `days` is capped at [`MAX_DAYS`].
pub fn daily_counts(
    timestamps: &[DateTime<Utc>],
    now: DateTime<FixedOffset>,
    days: u32,
) -> Vec<DailyCount> {
    let days = days.min(MAX_DAYS);
    if days == 0 {
        return Vec::new();
    }
    let today = now.date_naive();
    let Some(first) = today.checked_sub_signed(Duration::days(i64::from(days) - 1)) else {
        return Vec::new();
    };

    let mut counts: HashMap<NaiveDate, u32> = HashMap::new();
    for day in timestamps.iter().map(|t| local_day(*t, &now)) {
        if day >= first && day <= today {
            *counts.entry(day).or_default() += 1;
        }
    }

    first
        .iter_days()
        .take(days as usize)
        .map(|date| DailyCount {
            date,
            count: counts.get(&date).copied().unwrap_or(0),
        })
        .collect()
}

/// Longest and current runs of consecutive days with at least one commit.
///
/// The current streak ends today, or yesterday if nothing has been committed
/// yet today; otherwise it is zero.
pub fn streaks(timestamps: &[DateTime<Utc>], now: DateTime<FixedOffset>) -> Streaks {
    let days: BTreeSet<NaiveDate> = timestamps.iter().map(|t| local_day(*t, &now)).collect();

    let mut longest = 0;
    let mut run = 0;
    let mut previous: Option<NaiveDate> = None;
    for &day in &days {
        run = match previous {
            Some(prev) if prev.succ_opt() == Some(day) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        previous = Some(day);
    }

    let today = now.date_naive();
    let yesterday = today - Duration::days(1);
    let mut cursor = if days.contains(&today) {
        Some(today)
    } else if days.contains(&yesterday) {
        Some(yesterday)
    } else {
        None
    };
    let mut current = 0;
    while let Some(day) = cursor.filter(|d| days.contains(d)) {
        current += 1;
        cursor = day.pred_opt();
    }

    Streaks { current, longest }
}

/// Commit counts per weekday, Monday first.
pub fn weekday_histogram(timestamps: &[DateTime<Utc>], now: DateTime<FixedOffset>) -> [u32; 7] {
    let mut histogram = [0u32; 7];
    for t in timestamps {
        let index = local_day(*t, &now).weekday().num_days_from_monday() as usize;
        histogram[index] += 1;
    }
    histogram
}

/// Per-project totals, busiest first. Ties go to the most recently active
/// project, then to the name.
///
/// Fetched commit lists win over the counters stored on the project; projects
/// whose commits were not fetched fall back to those counters.
pub fn project_activity(
    projects: &[Project],
    commits: &HashMap<String, Vec<Commit>>,
) -> Vec<ProjectActivity> {
    let mut activity: Vec<ProjectActivity> = projects
        .iter()
        .map(|project| match commits.get(&project.id) {
            Some(list) => ProjectActivity {
                project_id: project.id.clone(),
                name: project.name.clone(),
                commits: u32::try_from(list.len()).unwrap_or(u32::MAX),
                last_commit_at: list
                    .iter()
                    .map(|c| c.committed_at)
                    .max()
                    .or(project.last_commit_at),
            },
            None => ProjectActivity {
                project_id: project.id.clone(),
                name: project.name.clone(),
                commits: u32::try_from(project.commit_count).unwrap_or(u32::MAX),
                last_commit_at: project.last_commit_at,
            },
        })
        .collect();

    activity.sort_by(|a, b| {
        b.commits
            .cmp(&a.commits)
            .then_with(|| b.last_commit_at.cmp(&a.last_commit_at))
            .then_with(|| a.name.cmp(&b.name))
    });
    activity
}

/// The `limit` newest commits across all projects.
pub fn recent_commits(
    projects: &[Project],
    commits: &HashMap<String, Vec<Commit>>,
    limit: usize,
) -> Vec<RecentCommit> {
    let mut recent: Vec<RecentCommit> = projects
        .iter()
        .filter_map(|p| commits.get(&p.id).map(|list| (p, list)))
        .flat_map(|(project, list)| {
            list.iter().map(move |commit| RecentCommit {
                project_id: project.id.clone(),
                project_name: project.name.clone(),
                sha: commit.sha.clone(),
                message: commit.summary().to_string(),
                committed_at: commit.committed_at,
            })
        })
        .collect();

    recent.sort_by_key(|c| (Reverse(c.committed_at), c.sha.clone()));
    recent.truncate(limit);
    recent
}

/// Build the whole dashboard from the fetched projects and their commits.
pub fn aggregate(
    projects: &[Project],
    commits: &HashMap<String, Vec<Commit>>,
    now: DateTime<FixedOffset>,
    days: u32,
) -> DashboardStats {
    let timestamps: Vec<DateTime<Utc>> = projects
        .iter()
        .filter_map(|p| commits.get(&p.id))
        .flatten()
        .map(|c| c.committed_at)
        .collect();

    let by_project = project_activity(projects, commits);
    let total_commits = by_project.iter().map(|a| a.commits).fold(0u32, u32::saturating_add);

    let today = now.date_naive();
    let week_start = today - Duration::days(6);
    let commits_last_7_days = timestamps
        .iter()
        .map(|t| local_day(*t, &now))
        .filter(|day| *day >= week_start && *day <= today)
        .count() as u32;

    DashboardStats {
        total_projects: projects.len() as u32,
        active_projects: projects.iter().filter(|p| p.is_active()).count() as u32,
        total_commits,
        commits_last_7_days,
        streaks: streaks(&timestamps, now),
        daily: daily_counts(&timestamps, now, days),
        weekdays: weekday_histogram(&timestamps, now),
        by_project,
        recent: recent_commits(projects, commits, RECENT_COMMIT_LIMIT),
        generated_at: now.with_timezone(&Utc),
    }
}
