//! Account summary reported by credential validation.

use serde::{Deserialize, Serialize};

/// Whether a scope belongs to a single user or an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    User,
    Org,
}

/// One scope the credentials can export, with its repository count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigAccount {
    /// Scope slug.
    pub id: String,

    #[serde(rename = "type")]
    pub account_type: AccountType,

    pub name: String,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub total_count: i64,
    pub public: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_serializes_camel_case() {
        let account = ConfigAccount {
            id: "acme".to_string(),
            account_type: AccountType::Org,
            name: "Acme".to_string(),
            description: None,
            avatar_url: Some("https://example.com/a.png".to_string()),
            total_count: 3,
            public: false,
        };

        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(json["type"], "org");
        assert_eq!(json["totalCount"], 3);
        assert_eq!(json["avatarUrl"], "https://example.com/a.png");
    }
}
