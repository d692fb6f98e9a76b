use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::models::{Commit, DashboardStats, Project};

/// Consider cache stale after 1 hour.
/// Commits only arrive when the backend syncs with GitHub, so an hour-old
/// copy is still useful offline.
const CACHE_STALE_MINUTES: i64 = 60;

const PROJECTS: &str = "projects";
const DASHBOARD: &str = "dashboard";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            // Round up: 1h 30m+ becomes 2h
            let hours = if minutes % 60 >= 30 { hours + 1 } else { hours };
            format!("{}h ago", hours)
        } else {
            let days = minutes / 1440;
            let days = if (minutes % 1440) / 60 >= 12 { days + 1 } else { days };
            format!("{}d ago", days)
        }
    }

    pub fn is_stale(&self) -> bool {
        self.age_minutes() > CACHE_STALE_MINUTES
    }
}

/// JSON snapshots of the last fetched data, one directory per user.
pub struct CacheManager {
    cache_dir: PathBuf,
}

impl CacheManager {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory {}", cache_dir.display()))?;
        Ok(Self { cache_dir })
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    fn cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", name))
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<CachedData<T>>> {
        let path = self.cache_path(name);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read cache file: {}", name))?;

        let cached: CachedData<T> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cache file: {}", name))?;

        Ok(Some(cached))
    }

    fn save<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        let cached = CachedData::new(data);
        let contents = serde_json::to_string_pretty(&cached)?;
        std::fs::write(self.cache_path(name), contents)
            .with_context(|| format!("Failed to write cache file: {}", name))?;
        debug!(cache = name, "Cache saved");
        Ok(())
    }

    // ===== Projects =====

    pub fn load_projects(&self) -> Result<Option<CachedData<Vec<Project>>>> {
        self.load(PROJECTS)
    }

    pub fn save_projects(&self, projects: &[Project]) -> Result<()> {
        self.save(PROJECTS, &projects)
    }

    // ===== Commits =====

    fn commits_name(project_id: &str) -> String {
        let safe: String = project_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("commits_{}", safe)
    }

    pub fn load_commits(&self, project_id: &str) -> Result<Option<CachedData<Vec<Commit>>>> {
        self.load(&Self::commits_name(project_id))
    }

    pub fn save_commits(&self, project_id: &str, commits: &[Commit]) -> Result<()> {
        self.save(&Self::commits_name(project_id), &commits)
    }

    // ===== Dashboard =====

    pub fn load_dashboard(&self) -> Result<Option<CachedData<DashboardStats>>> {
        self.load(DASHBOARD)
    }

    pub fn save_dashboard(&self, stats: &DashboardStats) -> Result<()> {
        self.save(DASHBOARD, stats)
    }

    /// Remove every cached file. Called on logout so the next user starts
    /// clean.
    pub fn clear(&self) -> Result<()> {
        let entries = match std::fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).context("Failed to read cache directory"),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }
        debug!(dir = %self.cache_dir.display(), "Cache cleared");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
