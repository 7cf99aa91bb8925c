//! Pull request review and review request records.
//!
//! Both are derived from the participant list embedded in the pull request
//! payload rather than fetched separately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Approved,
}

/// A review left by an approving reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestReview {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub repo_id: String,
    pub pull_request_id: String,
    pub user_ref_id: String,
    pub state: ReviewState,
    pub active: bool,
}

/// A reviewer who was asked to review but has not participated yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestReviewRequest {
    pub id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub repo_id: String,
    pub pull_request_id: String,
    pub requested_reviewer_ref_id: String,
    pub created_date: Option<DateTime<Utc>>,
    pub active: bool,
}
