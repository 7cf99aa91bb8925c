//! Scope member record.

use serde::{Deserialize, Serialize};

/// A normalized user that belongs to a scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,

    /// External id (the account uuid).
    pub ref_id: String,

    pub ref_type: String,
    pub customer_id: String,

    /// Display name.
    pub name: String,

    /// Nickname, if the account exposes one.
    pub username: Option<String>,

    pub avatar_url: Option<String>,
    pub url: Option<String>,

    /// Whether this account is a member of a scope being exported.
    pub member: bool,
}
