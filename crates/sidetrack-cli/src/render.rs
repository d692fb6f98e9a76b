//! Plain-text output for the terminal.

use chrono::{DateTime, Utc};
use sidetrack_core::models::{Commit, DashboardStats, Project, User};
use sidetrack_core::utils::{format_date, format_optional, plural, relative_time, truncate_string};

/// Width of the project name column.
const NAME_WIDTH: usize = 28;

/// Longest bar in the daily chart.
const BAR_WIDTH: usize = 30;

pub fn user(user: &User) {
    println!("{} <{}>", user.name, user.email);
    println!("GitHub:  {}", user.github_display());
    if let Some(created) = user.created_at {
        println!("Member since {}", format_date(created));
    }
}

pub fn project_table(projects: &[Project], now: DateTime<Utc>) {
    if projects.is_empty() {
        println!("No projects yet. Add one with `sidetrack projects add`.");
        return;
    }
    println!(
        "{:<10} {:<width$} {:<10} {:>8}  {}",
        "ID",
        "NAME",
        "STATUS",
        "COMMITS",
        "LAST COMMIT",
        width = NAME_WIDTH
    );
    for p in projects {
        let last = p
            .last_commit_at
            .map(|at| relative_time(at, now))
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<10} {:<width$} {:<10} {:>8}  {}",
            truncate_string(&p.id, 10),
            truncate_string(&p.name, NAME_WIDTH),
            p.status.to_string(),
            p.commit_count,
            last,
            width = NAME_WIDTH
        );
    }
}

pub fn project(project: &Project) {
    println!("{} ({})", project.name, project.status);
    println!("  id:          {}", project.id);
    println!("  repository:  {}", project.repo_url);
    println!(
        "  description: {}",
        format_optional(&project.description, "-")
    );
    if !project.tags.is_empty() {
        println!("  tags:        {}", project.tags.join(", "));
    }
    println!(
        "  commits:     {} (last {})",
        project.commit_count,
        project.last_commit_display()
    );
}

pub fn commits(commits: &[Commit], limit: usize, now: DateTime<Utc>) {
    if commits.is_empty() {
        println!("No commits synced yet.");
        return;
    }
    let mut sorted: Vec<&Commit> = commits.iter().collect();
    sorted.sort_by(|a, b| b.committed_at.cmp(&a.committed_at));
    for c in sorted.iter().take(limit) {
        println!(
            "{}  {:>9}  {}",
            c.short_sha(),
            relative_time(c.committed_at, now),
            truncate_string(c.summary(), 72)
        );
    }
    if commits.len() > limit {
        println!("... and {} more", commits.len() - limit);
    }
}

pub fn dashboard(stats: &DashboardStats, age: Option<&str>) {
    if let Some(age) = age {
        println!("(cached {})", age);
    }
    println!(
        "{} ({} active), {}, {} in the last 7 days",
        plural(u64::from(stats.total_projects), "project"),
        stats.active_projects,
        plural(u64::from(stats.total_commits), "commit"),
        stats.commits_last_7_days
    );
    println!(
        "Streak: {} current, {} longest",
        plural(u64::from(stats.streaks.current), "day"),
        plural(u64::from(stats.streaks.longest), "day")
    );
    if let Some(day) = stats.busiest_weekday() {
        println!("Busiest weekday: {}", day);
    }

    let max = stats.daily.iter().map(|d| d.count).max().unwrap_or(0);
    if max > 0 {
        println!();
        for day in &stats.daily {
            println!("{}  {:<width$} {}", day.date.format("%m-%d"), bar(day.count, max), day.count, width = BAR_WIDTH);
        }
    }

    if !stats.by_project.is_empty() {
        println!();
        for activity in &stats.by_project {
            println!(
                "{:<width$} {:>6}",
                truncate_string(&activity.name, NAME_WIDTH),
                activity.commits,
                width = NAME_WIDTH
            );
        }
    }

    if !stats.recent.is_empty() {
        println!("\nRecent commits:");
        for c in &stats.recent {
            println!(
                "  {} {:<16} {}",
                format_date(c.committed_at),
                truncate_string(&c.project_name, 16),
                truncate_string(&c.message, 60)
            );
        }
    }
}

fn bar(count: u32, max: u32) -> String {
    if max == 0 {
        return String::new();
    }
    let len = (count as usize * BAR_WIDTH).div_ceil(max as usize);
    "#".repeat(len)
}
