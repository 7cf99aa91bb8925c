//! Pull request commit record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized commit belonging to a pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestCommit {
    pub id: String,

    /// External id (the commit hash).
    pub ref_id: String,

    pub ref_type: String,
    pub customer_id: String,
    pub repo_id: String,
    pub pull_request_id: String,

    pub sha: String,
    pub message: String,
    pub url: String,

    /// Author account uuid; empty when the raw author is not linked to an account.
    pub author_ref_id: String,

    pub created_date: Option<DateTime<Utc>>,
    pub active: bool,
}
