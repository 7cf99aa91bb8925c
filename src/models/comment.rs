//! Pull request comment record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized comment on a pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestComment {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub repo_id: String,
    pub pull_request_id: String,

    /// Comment body rendered to HTML.
    pub body: String,

    pub url: String,
    pub user_ref_id: String,
    pub created_date: Option<DateTime<Utc>>,
    pub updated_date: Option<DateTime<Utc>>,
    pub active: bool,
}
