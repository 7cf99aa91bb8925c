//! Export configuration.
//!
//! Loaded from JSON by the host. Only shape and presence are checked here; the
//! credentials themselves are checked against the API by
//! [`crate::services::validate::validate_accounts`].

use crate::error::AppError;
use crate::services::bitbucket_client::DEFAULT_BASE_URL;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_ref_type() -> String {
    "bitbucket".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// How requests are authorized.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    /// Username and app password.
    Basic { username: String, password: String },

    /// OAuth2 access token plus refresh token.
    OAuth2 {
        access_token: String,
        refresh_token: String,
    },
}

/// Repository name patterns per scope slug.
///
/// A pattern matches the full name (`acme/widgets`), the short name
/// (`widgets`), or any name starting with the text before a trailing `*`.
/// A lone `*` matches every repository of the scope. Matching ignores ASCII
/// case.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct RepoFilter(pub HashMap<String, Vec<String>>);

impl RepoFilter {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether any pattern of `scope` matches `full_name`.
    pub fn matches(&self, scope: &str, full_name: &str) -> bool {
        let Some(patterns) = self.0.get(scope) else {
            return false;
        };
        let short_name = full_name
            .split_once('/')
            .map(|(_, name)| name)
            .unwrap_or(full_name);

        patterns.iter().any(|pattern| {
            let pattern = pattern.trim();
            if pattern == "*" {
                return true;
            }
            if let Some(prefix) = pattern.strip_suffix('*') {
                return starts_with_ignore_case(full_name, prefix)
                    || starts_with_ignore_case(short_name, prefix);
            }
            pattern.eq_ignore_ascii_case(full_name) || pattern.eq_ignore_ascii_case(short_name)
        })
    }
}

fn starts_with_ignore_case(name: &str, prefix: &str) -> bool {
    name.len() >= prefix.len()
        && name.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Configuration of one export.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    pub customer_id: String,

    /// Integration kind stamped on every record.
    #[serde(default = "default_ref_type")]
    pub ref_type: String,

    pub auth: AuthConfig,

    /// Scope slugs exported in addition to the discovered ones.
    #[serde(default)]
    pub accounts: Vec<String>,

    /// When set, only matching repositories are exported.
    #[serde(default)]
    pub inclusions: Option<RepoFilter>,

    /// Matching repositories are skipped.
    #[serde(default)]
    pub exclusions: Option<RepoFilter>,

    /// Ignore the stored watermark and export everything.
    #[serde(default)]
    pub historical: bool,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ExportConfig {
    pub fn from_json_str(json: &str) -> Result<Self, AppError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AppError::invalid_input(format!("Invalid export config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, AppError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            AppError::invalid_input(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Reject configurations that cannot possibly authenticate or be stored.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.customer_id.trim().is_empty() {
            return Err(AppError::invalid_input_field("customer id is required", "customer_id"));
        }
        if self.base_url.trim().is_empty() {
            return Err(AppError::invalid_input_field("base url is required", "base_url"));
        }
        if self.timeout_secs == 0 {
            return Err(AppError::invalid_input_field(
                "timeout must be at least one second",
                "timeout_secs",
            ));
        }

        match &self.auth {
            AuthConfig::Basic { username, password } => {
                if username.trim().is_empty() {
                    return Err(AppError::invalid_input_field("missing username", "auth.username"));
                }
                if password.is_empty() {
                    return Err(AppError::invalid_input_field("missing password", "auth.password"));
                }
            }
            AuthConfig::OAuth2 {
                access_token,
                refresh_token,
            } => {
                if access_token.is_empty() {
                    return Err(AppError::invalid_input_field(
                        "missing access token",
                        "auth.access_token",
                    ));
                }
                if refresh_token.is_empty() {
                    return Err(AppError::invalid_input_field(
                        "missing refresh token",
                        "auth.refresh_token",
                    ));
                }
            }
        }

        Ok(())
    }

    /// Whether a repository of `scope` passes the inclusion and exclusion
    /// filters. Exclusions win over inclusions.
    pub fn includes_repo(&self, scope: &str, full_name: &str) -> bool {
        if let Some(exclusions) = &self.exclusions {
            if exclusions.matches(scope, full_name) {
                return false;
            }
        }
        match &self.inclusions {
            Some(inclusions) if !inclusions.is_empty() => inclusions.matches(scope, full_name),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(extra: &str) -> Result<ExportConfig, AppError> {
        ExportConfig::from_json_str(&format!(
            r#"{{
                "customer_id": "cust-1",
                "auth": {{ "type": "basic", "username": "dev", "password": "secret" }}
                {}
            }}"#,
            extra
        ))
    }

    #[test]
    fn test_defaults() {
        let config = config("").unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.ref_type, "bitbucket");
        assert_eq!(config.timeout_secs, 30);
        assert!(config.accounts.is_empty());
        assert!(!config.historical);
        assert!(config.includes_repo("acme", "acme/widgets"));
    }

    #[test]
    fn test_oauth2_auth() {
        let config = ExportConfig::from_json_str(
            r#"{
                "customer_id": "cust-1",
                "auth": { "type": "oauth2", "access_token": "a", "refresh_token": "r" }
            }"#,
        )
        .unwrap();
        assert!(matches!(config.auth, AuthConfig::OAuth2 { .. }));
    }

    #[test]
    fn test_missing_username_rejected() {
        let err = ExportConfig::from_json_str(
            r#"{
                "customer_id": "cust-1",
                "auth": { "type": "basic", "username": " ", "password": "secret" }
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput { field: Some(ref f), .. } if f == "auth.username"));
    }

    #[test]
    fn test_missing_customer_rejected() {
        let err = ExportConfig::from_json_str(
            r#"{ "customer_id": "", "auth": { "type": "basic", "username": "u", "password": "p" } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput { .. }));
    }

    #[test]
    fn test_repo_filter_patterns() {
        let filter: RepoFilter = serde_json::from_value(serde_json::json!({
            "acme": ["acme/widgets", "tools", "svc-*"],
            "solo": ["*"]
        }))
        .unwrap();

        assert!(filter.matches("acme", "acme/widgets"));
        assert!(filter.matches("acme", "acme/tools"));
        assert!(filter.matches("acme", "acme/svc-billing"));
        assert!(!filter.matches("acme", "acme/gadgets"));
        assert!(filter.matches("solo", "solo/anything"));
        // exact and prefix patterns both ignore case
        assert!(filter.matches("acme", "acme/Widgets"));
        assert!(filter.matches("acme", "acme/SVC-Billing"));
        assert!(!filter.matches("other", "other/widgets"));
    }

    #[test]
    fn test_exclusions_win_over_inclusions() {
        let config = config(
            r#", "inclusions": { "acme": ["*"] }, "exclusions": { "acme": ["acme/legacy"] }"#,
        )
        .unwrap();

        assert!(config.includes_repo("acme", "acme/widgets"));
        assert!(!config.includes_repo("acme", "acme/legacy"));
        // scope without inclusion patterns is filtered out once inclusions exist
        assert!(!config.includes_repo("other", "other/widgets"));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        std::fs::write(
            &path,
            r#"{ "customer_id": "c", "auth": { "type": "basic", "username": "u", "password": "p" },
                 "accounts": ["acme"] }"#,
        )
        .unwrap();

        let config = ExportConfig::from_json_file(&path).unwrap();
        assert_eq!(config.accounts, vec!["acme".to_string()]);
    }
}
