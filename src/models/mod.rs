//! Normalized output records.
//!
//! These are the shapes handed to the sink. Raw API payloads live in
//! `services::bitbucket_types` and are mapped here by `services::convert`.

pub mod account;
pub mod comment;
pub mod commit;
pub mod ids;
pub mod pull_request;
pub mod record;
pub mod repo;
pub mod review;
pub mod user;

// Re-exports for convenient access
pub use account::{AccountType, ConfigAccount};
pub use comment::PullRequestComment;
pub use commit::PullRequestCommit;
pub use pull_request::{PullRequest, PullRequestStatus};
pub use record::{Record, RecordKind};
pub use repo::Repo;
pub use review::{PullRequestReview, PullRequestReviewRequest, ReviewState};
pub use user::User;
