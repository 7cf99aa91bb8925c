//! Repository record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized source-code repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repo {
    /// Composite internal id.
    pub id: String,

    /// External id (the repository uuid).
    pub ref_id: String,

    pub ref_type: String,
    pub customer_id: String,

    /// Full name, e.g. `acme/widgets`.
    pub name: String,

    pub default_branch: String,
    pub description: String,
    pub language: String,

    /// Web URL of the repository.
    pub url: String,

    pub updated_date: Option<DateTime<Utc>>,
    pub active: bool,
}

impl Repo {
    /// Scope slug part of the full name (`acme` for `acme/widgets`).
    pub fn scope_slug(&self) -> &str {
        self.name.split('/').next().unwrap_or_default()
    }
}
