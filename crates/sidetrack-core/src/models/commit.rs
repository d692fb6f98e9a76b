use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A commit as mirrored from GitHub by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub sha: String,
    pub message: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(alias = "date")]
    pub committed_at: DateTime<Utc>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub additions: Option<u64>,
    #[serde(default)]
    pub deletions: Option<u64>,
}

impl Commit {
    pub fn short_sha(&self) -> &str {
        let end = self
            .sha
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.sha.len());
        &self.sha[..end]
    }

    /// First line of the commit message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("").trim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commit_with_date_alias() {
        let json = r#"{"sha":"a1b2c3d4e5f6","message":"Fix refresh loop\n\nDetails here","author":"ada","date":"2024-05-02T08:30:00Z"}"#;
        let commit: Commit = serde_json::from_str(json).expect("Failed to parse commit JSON");
        assert_eq!(commit.short_sha(), "a1b2c3d");
        assert_eq!(commit.summary(), "Fix refresh loop");
        assert!(commit.additions.is_none());
    }

    #[test]
    fn test_short_sha_of_short_value() {
        let json = r#"{"sha":"abc","message":"","committedAt":"2024-05-02T08:30:00Z"}"#;
        let commit: Commit = serde_json::from_str(json).expect("Failed to parse commit JSON");
        assert_eq!(commit.short_sha(), "abc");
        assert_eq!(commit.summary(), "");
    }
}
