//! Raw payload to record conversion.
//!
//! Every function here is pure: one raw record plus its identifying context in,
//! one normalized record out. Lookups that need state (the first commit of a
//! pull request) are done by the caller and passed in.

use crate::models::{
    ids, PullRequest, PullRequestComment, PullRequestCommit, PullRequestReview,
    PullRequestReviewRequest, PullRequestStatus, Repo, ReviewState, User,
};
use crate::services::bitbucket_types::{
    RawAccount, RawComment, RawCommit, RawParticipant, RawPullRequest, RawRepository,
};
use crate::services::markdown::markdown_to_html;
use chrono::{DateTime, Utc};

/// Participant role that can review.
const REVIEWER_ROLE: &str = "REVIEWER";

/// Customer and integration identity shared by every record of a run.
#[derive(Debug, Clone)]
pub struct ConvertContext {
    pub customer_id: String,
    pub ref_type: String,
}

impl ConvertContext {
    pub fn new(customer_id: impl Into<String>, ref_type: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            ref_type: ref_type.into(),
        }
    }

    pub fn repo_id(&self, repo_ref_id: &str) -> String {
        ids::repo_id(&self.customer_id, repo_ref_id, &self.ref_type)
    }

    pub fn pull_request_id(&self, repo_id: &str, pr_ref_id: &str) -> String {
        ids::pull_request_id(&self.customer_id, pr_ref_id, &self.ref_type, repo_id)
    }
}

/// Map a zero or pre-epoch timestamp to unset.
///
/// The API reports "never" as a zero date on some fields; it must not turn into
/// a concrete date downstream.
pub fn normalize_date(value: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    value.filter(|d| d.timestamp() > 0)
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

pub fn convert_repo(ctx: &ConvertContext, raw: &RawRepository) -> Repo {
    Repo {
        id: ctx.repo_id(&raw.uuid),
        ref_id: raw.uuid.clone(),
        ref_type: ctx.ref_type.clone(),
        customer_id: ctx.customer_id.clone(),
        name: raw.full_name.clone(),
        default_branch: raw
            .mainbranch
            .as_ref()
            .map(|b| b.name.clone())
            .unwrap_or_default(),
        description: raw.description.clone(),
        language: raw.language.clone(),
        url: raw.links.html_href(),
        updated_date: normalize_date(raw.updated_on),
        active: true,
    }
}

pub fn convert_user(ctx: &ConvertContext, raw: &RawAccount) -> User {
    User {
        id: ids::user_id(&ctx.customer_id, &raw.uuid, &ctx.ref_type),
        ref_id: raw.uuid.clone(),
        ref_type: ctx.ref_type.clone(),
        customer_id: ctx.customer_id.clone(),
        name: raw.display_name.clone(),
        username: raw.nickname.clone().filter(|n| !n.is_empty()),
        avatar_url: raw.links.avatar_href(),
        url: optional(&raw.links.html_href()),
        member: true,
    }
}

/// Convert a pull request.
///
/// `first_commit_sha` is the derived fact recorded while the pull request's
/// commits were listed; `None` when nothing was recorded.
pub fn convert_pull_request(
    ctx: &ConvertContext,
    raw: &RawPullRequest,
    repo_ref_id: &str,
    first_commit_sha: Option<&str>,
) -> PullRequest {
    let repo_id = ctx.repo_id(repo_ref_id);
    let ref_id = raw.id.to_string();
    let status = PullRequestStatus::from(raw.state.as_str());
    let updated = normalize_date(raw.updated_on);

    let first_commit_sha = first_commit_sha.filter(|s| !s.is_empty());
    let first_commit_id =
        first_commit_sha.map(|sha| ids::commit_id(&ctx.customer_id, sha, &ctx.ref_type, &repo_id));

    let branch_name = raw.source.branch.name.clone();
    let branch_id = ids::branch_id(
        &ctx.customer_id,
        &repo_id,
        &ctx.ref_type,
        &branch_name,
        first_commit_id.as_deref().unwrap_or_default(),
    );

    let closed_by = raw
        .closed_by
        .as_ref()
        .map(|a| a.uuid.clone())
        .filter(|uuid| !uuid.is_empty());

    let mut pr = PullRequest {
        id: ctx.pull_request_id(&repo_id, &ref_id),
        ref_id,
        ref_type: ctx.ref_type.clone(),
        customer_id: ctx.customer_id.clone(),
        repo_id,
        identifier: format!("#{}", raw.id),
        title: raw.title.clone(),
        description: format!(
            "<div class=\"source-bitbucket\">{}</div>",
            markdown_to_html(&raw.description)
        ),
        url: raw.links.html_href(),
        status,
        branch_name,
        branch_id,
        first_commit_sha: first_commit_sha.map(str::to_string),
        first_commit_id,
        merge_sha: None,
        merge_commit_id: None,
        created_by_ref_id: raw.author.uuid.clone(),
        merged_by_ref_id: None,
        closed_by_ref_id: None,
        created_date: normalize_date(raw.created_on),
        updated_date: updated,
        merged_date: None,
        closed_date: None,
        active: true,
    };

    match status {
        PullRequestStatus::Merged => {
            if let Some(hash) = raw
                .merge_commit
                .as_ref()
                .map(|c| c.hash.as_str())
                .filter(|h| !h.is_empty())
            {
                pr.merge_commit_id = Some(ids::commit_id(
                    &ctx.customer_id,
                    hash,
                    &ctx.ref_type,
                    &pr.repo_id,
                ));
                pr.merge_sha = Some(hash.to_string());
            }
            pr.merged_by_ref_id = closed_by.clone();
            pr.closed_by_ref_id = closed_by;
            pr.merged_date = updated;
            pr.closed_date = updated;
        }
        PullRequestStatus::Declined => {
            pr.closed_by_ref_id = closed_by;
            pr.closed_date = updated;
        }
        PullRequestStatus::Open | PullRequestStatus::Unknown => {}
    }

    pr
}

pub fn convert_comment(
    ctx: &ConvertContext,
    raw: &RawComment,
    repo_ref_id: &str,
    pr_ref_id: &str,
) -> PullRequestComment {
    let repo_id = ctx.repo_id(repo_ref_id);
    let pull_request_id = ctx.pull_request_id(&repo_id, pr_ref_id);
    let ref_id = raw.id.to_string();

    PullRequestComment {
        id: ids::comment_id(&ctx.customer_id, &ref_id, &ctx.ref_type, &pull_request_id),
        ref_id,
        ref_type: ctx.ref_type.clone(),
        customer_id: ctx.customer_id.clone(),
        repo_id,
        pull_request_id,
        body: markdown_to_html(&raw.content.raw),
        url: raw.links.html_href(),
        user_ref_id: raw.user.uuid.clone(),
        created_date: normalize_date(raw.created_on),
        updated_date: normalize_date(raw.updated_on),
        active: !raw.deleted,
    }
}

pub fn convert_commit(
    ctx: &ConvertContext,
    raw: &RawCommit,
    repo_ref_id: &str,
    pr_ref_id: &str,
) -> PullRequestCommit {
    let repo_id = ctx.repo_id(repo_ref_id);
    let pull_request_id = ctx.pull_request_id(&repo_id, pr_ref_id);

    PullRequestCommit {
        id: ids::commit_id(&ctx.customer_id, &raw.hash, &ctx.ref_type, &repo_id),
        ref_id: raw.hash.clone(),
        ref_type: ctx.ref_type.clone(),
        customer_id: ctx.customer_id.clone(),
        repo_id,
        pull_request_id,
        sha: raw.hash.clone(),
        message: raw.message.clone(),
        url: raw.links.html_href(),
        author_ref_id: raw
            .author
            .user
            .as_ref()
            .map(|u| u.uuid.clone())
            .unwrap_or_default(),
        created_date: normalize_date(raw.date),
        active: true,
    }
}

fn is_reviewer(participant: &RawParticipant) -> bool {
    participant.role.eq_ignore_ascii_case(REVIEWER_ROLE)
}

/// Derive reviews and review requests from the embedded participant list.
///
/// An approving reviewer yields a review; a reviewer who has not participated
/// yet yields a review request. Other participants yield nothing.
pub fn derive_reviews(
    ctx: &ConvertContext,
    raw: &RawPullRequest,
    repo_ref_id: &str,
) -> (Vec<PullRequestReview>, Vec<PullRequestReviewRequest>) {
    let repo_id = ctx.repo_id(repo_ref_id);
    let pull_request_id = ctx.pull_request_id(&repo_id, &raw.id.to_string());

    let mut reviews = Vec::new();
    let mut requests = Vec::new();

    for participant in raw.participants.iter().filter(|p| is_reviewer(p)) {
        let user_ref_id = participant.user.uuid.clone();

        if participant.approved {
            reviews.push(PullRequestReview {
                id: ids::review_id(&ctx.customer_id, &user_ref_id, &ctx.ref_type, &pull_request_id),
                ref_id: user_ref_id.clone(),
                ref_type: ctx.ref_type.clone(),
                customer_id: ctx.customer_id.clone(),
                repo_id: repo_id.clone(),
                pull_request_id: pull_request_id.clone(),
                user_ref_id,
                state: ReviewState::Approved,
                active: true,
            });
        } else if normalize_date(participant.participated_on).is_none() {
            requests.push(PullRequestReviewRequest {
                id: ids::review_request_id(
                    &ctx.customer_id,
                    &ctx.ref_type,
                    &pull_request_id,
                    &user_ref_id,
                ),
                ref_type: ctx.ref_type.clone(),
                customer_id: ctx.customer_id.clone(),
                repo_id: repo_id.clone(),
                pull_request_id: pull_request_id.clone(),
                requested_reviewer_ref_id: user_ref_id,
                created_date: normalize_date(raw.updated_on),
                active: true,
            });
        }
    }

    (reviews, requests)
}
