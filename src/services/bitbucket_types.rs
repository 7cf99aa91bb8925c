//! Raw Bitbucket API payload shapes.
//!
//! Only the fields the export reads are declared. Identity fields are
//! required so a malformed record fails to decode; everything else defaults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope shared by every list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PageEnvelope {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub pagelen: Option<i64>,
    #[serde(default)]
    pub size: Option<i64>,
    /// URL of the next page; absent on the last page.
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub values: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Link {
    #[serde(default)]
    pub href: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Links {
    #[serde(default)]
    pub html: Option<Link>,
    #[serde(default)]
    pub avatar: Option<Link>,
}

impl Links {
    pub fn html_href(&self) -> String {
        self.html.as_ref().map(|l| l.href.clone()).unwrap_or_default()
    }

    pub fn avatar_href(&self) -> Option<String> {
        self.avatar.as_ref().map(|l| l.href.clone()).filter(|h| !h.is_empty())
    }
}

/// An account reference embedded in other payloads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAccount {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub links: Links,
}

/// Response of `GET user`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCurrentUser {
    pub uuid: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawWorkspace {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub links: Links,
}

/// Entry of `workspaces/{slug}/members`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMember {
    pub user: RawAccount,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBranchRef {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCommitRef {
    #[serde(default)]
    pub hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRepository {
    pub uuid: String,
    pub full_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub mainbranch: Option<RawBranchRef>,
    #[serde(default)]
    pub links: Links,
    #[serde(default)]
    pub updated_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEndpoint {
    #[serde(default)]
    pub branch: RawBranchRef,
    #[serde(default)]
    pub commit: Option<RawCommitRef>,
}

/// A participant embedded in a pull request.
#[derive(Debug, Clone, Deserialize)]
pub struct RawParticipant {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub approved: bool,
    /// Unset until the participant has commented, approved or declined.
    #[serde(default)]
    pub participated_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: RawAccount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPullRequest {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub author: RawAccount,
    #[serde(default)]
    pub closed_by: Option<RawAccount>,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: RawEndpoint,
    #[serde(default)]
    pub merge_commit: Option<RawCommitRef>,
    #[serde(default)]
    pub participants: Vec<RawParticipant>,
    #[serde(default)]
    pub links: Links,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawContent {
    #[serde(default)]
    pub raw: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawComment {
    pub id: i64,
    #[serde(default)]
    pub content: RawContent,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub user: RawAccount,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub links: Links,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCommitAuthor {
    /// `Name <email>` as recorded in git.
    #[serde(default)]
    pub raw: String,
    #[serde(default)]
    pub user: Option<RawAccount>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCommit {
    pub hash: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub author: RawCommitAuthor,
    #[serde(default)]
    pub links: Links,
}

/// Body of `POST repositories/{scope}/{repo}/hooks`.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub description: String,
    pub url: String,
    pub active: bool,
    pub events: Vec<String>,
}

/// Hook as returned by the API after creation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawWebhook {
    pub uuid: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub events: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_request_decodes_with_sparse_fields() {
        let pr: RawPullRequest = serde_json::from_value(serde_json::json!({
            "id": 12,
            "state": "OPEN",
            "updated_on": "2024-03-01T10:00:00.123456+00:00",
            "participants": [
                { "role": "REVIEWER", "approved": false, "participated_on": null,
                  "user": { "uuid": "{u1}", "account_id": "a1" } }
            ]
        }))
        .unwrap();

        assert_eq!(pr.id, 12);
        assert!(pr.updated_on.is_some());
        assert!(pr.merge_commit.is_none());
        assert_eq!(pr.participants.len(), 1);
        assert!(pr.participants[0].participated_on.is_none());
    }

    #[test]
    fn test_pull_request_without_id_fails() {
        let result = serde_json::from_value::<RawPullRequest>(serde_json::json!({
            "title": "no id"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_page_envelope_last_page() {
        let page: PageEnvelope = serde_json::from_value(serde_json::json!({
            "page": 3, "pagelen": 50, "size": 101, "values": [{}]
        }))
        .unwrap();
        assert!(page.next.is_none());
        assert_eq!(page.values.len(), 1);
        assert_eq!(page.size, Some(101));
    }
}
