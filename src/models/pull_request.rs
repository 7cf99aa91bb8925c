//! Pull request record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestStatus {
    Open,
    Merged,
    Declined,
    Unknown,
}

impl From<&str> for PullRequestStatus {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "OPEN" => Self::Open,
            "MERGED" => Self::Merged,
            "DECLINED" => Self::Declined,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for PullRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Merged => write!(f, "merged"),
            Self::Declined => write!(f, "declined"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A normalized pull request.
///
/// `first_commit_sha` is not part of the remote payload. It is looked up from
/// the state written while the pull request's commits were scanned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: String,

    /// External id (the pull request number).
    pub ref_id: String,

    pub ref_type: String,
    pub customer_id: String,
    pub repo_id: String,

    /// UI identifier, e.g. `#12`.
    pub identifier: String,

    pub title: String,

    /// Description rendered to HTML.
    pub description: String,

    pub url: String,
    pub status: PullRequestStatus,

    pub branch_name: String,
    pub branch_id: String,

    /// Hash of the first commit found on the pull request, if any.
    pub first_commit_sha: Option<String>,
    pub first_commit_id: Option<String>,

    pub merge_sha: Option<String>,
    pub merge_commit_id: Option<String>,

    pub created_by_ref_id: String,
    pub merged_by_ref_id: Option<String>,
    pub closed_by_ref_id: Option<String>,

    pub created_date: Option<DateTime<Utc>>,
    pub updated_date: Option<DateTime<Utc>>,
    pub merged_date: Option<DateTime<Utc>>,
    pub closed_date: Option<DateTime<Utc>>,

    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_str() {
        assert_eq!(PullRequestStatus::from("OPEN"), PullRequestStatus::Open);
        assert_eq!(PullRequestStatus::from("merged"), PullRequestStatus::Merged);
        assert_eq!(PullRequestStatus::from("DECLINED"), PullRequestStatus::Declined);
        assert_eq!(PullRequestStatus::from("SUPERSEDED"), PullRequestStatus::Unknown);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&PullRequestStatus::Merged).unwrap();
        assert_eq!(json, "\"merged\"");
        assert_eq!(PullRequestStatus::Declined.to_string(), "declined");
    }
}
