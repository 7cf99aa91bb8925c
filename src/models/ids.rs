//! Deterministic composite identifiers.
//!
//! The same external object must map to the same internal id on every run, so
//! ids are a truncated SHA-256 over a kind tag plus the identifying parts.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the digest.
const ID_LEN: usize = 16;

/// Hash a list of values into a short stable hex id.
///
/// Parts are separated by a unit separator so `("ab", "c")` and `("a", "bc")`
/// never collide.
pub fn hash_values(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..ID_LEN].to_string()
}

pub fn repo_id(customer_id: &str, repo_ref_id: &str, ref_type: &str) -> String {
    hash_values(&["repo", customer_id, ref_type, repo_ref_id])
}

pub fn user_id(customer_id: &str, user_ref_id: &str, ref_type: &str) -> String {
    hash_values(&["user", customer_id, ref_type, user_ref_id])
}

/// Pull request id, scoped to its repository's internal id.
pub fn pull_request_id(customer_id: &str, pr_ref_id: &str, ref_type: &str, repo_id: &str) -> String {
    hash_values(&["pull_request", customer_id, ref_type, repo_id, pr_ref_id])
}

/// Commit id, scoped to its repository's internal id.
pub fn commit_id(customer_id: &str, sha: &str, ref_type: &str, repo_id: &str) -> String {
    hash_values(&["commit", customer_id, ref_type, repo_id, sha])
}

/// Branch id: a branch name is only unique together with the commit it was cut from.
pub fn branch_id(
    customer_id: &str,
    repo_id: &str,
    ref_type: &str,
    branch_name: &str,
    first_commit_id: &str,
) -> String {
    hash_values(&["branch", customer_id, ref_type, repo_id, branch_name, first_commit_id])
}

pub fn comment_id(customer_id: &str, comment_ref_id: &str, ref_type: &str, pr_id: &str) -> String {
    hash_values(&["pull_request_comment", customer_id, ref_type, pr_id, comment_ref_id])
}

pub fn review_id(customer_id: &str, review_ref_id: &str, ref_type: &str, pr_id: &str) -> String {
    hash_values(&["pull_request_review", customer_id, ref_type, pr_id, review_ref_id])
}

pub fn review_request_id(
    customer_id: &str,
    ref_type: &str,
    pr_id: &str,
    reviewer_ref_id: &str,
) -> String {
    hash_values(&["pull_request_review_request", customer_id, ref_type, pr_id, reviewer_ref_id])
}
