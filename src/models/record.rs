//! Tagged union of everything an export run hands to the sink.

use serde::Serialize;

use super::{
    PullRequest, PullRequestComment, PullRequestCommit, PullRequestReview,
    PullRequestReviewRequest, Repo, User,
};

/// Kind of record, one per output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Repo,
    User,
    PullRequest,
    PullRequestComment,
    PullRequestCommit,
    PullRequestReview,
    PullRequestReviewRequest,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Repo => "repos",
            Self::User => "users",
            Self::PullRequest => "pull requests",
            Self::PullRequestComment => "pull request comments",
            Self::PullRequestCommit => "pull request commits",
            Self::PullRequestReview => "pull request reviews",
            Self::PullRequestReviewRequest => "pull request review requests",
        };
        f.write_str(name)
    }
}

/// A normalized record ready for the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "model", content = "data", rename_all = "snake_case")]
pub enum Record {
    Repo(Repo),
    User(User),
    PullRequest(PullRequest),
    PullRequestComment(PullRequestComment),
    PullRequestCommit(PullRequestCommit),
    PullRequestReview(PullRequestReview),
    PullRequestReviewRequest(PullRequestReviewRequest),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Repo(_) => RecordKind::Repo,
            Self::User(_) => RecordKind::User,
            Self::PullRequest(_) => RecordKind::PullRequest,
            Self::PullRequestComment(_) => RecordKind::PullRequestComment,
            Self::PullRequestCommit(_) => RecordKind::PullRequestCommit,
            Self::PullRequestReview(_) => RecordKind::PullRequestReview,
            Self::PullRequestReviewRequest(_) => RecordKind::PullRequestReviewRequest,
        }
    }

    /// Composite id of the wrapped record.
    pub fn id(&self) -> &str {
        match self {
            Self::Repo(r) => &r.id,
            Self::User(r) => &r.id,
            Self::PullRequest(r) => &r.id,
            Self::PullRequestComment(r) => &r.id,
            Self::PullRequestCommit(r) => &r.id,
            Self::PullRequestReview(r) => &r.id,
            Self::PullRequestReviewRequest(r) => &r.id,
        }
    }
}

macro_rules! impl_from_record {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Record {
                fn from(value: $variant) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_record!(
    Repo,
    User,
    PullRequest,
    PullRequestComment,
    PullRequestCommit,
    PullRequestReview,
    PullRequestReviewRequest,
);
