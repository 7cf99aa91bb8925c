//! Credential validation: which scopes can these credentials export?

use crate::error::AppError;
use crate::models::{AccountType, ConfigAccount};
use crate::services::bitbucket_client::BitbucketClient;

/// List every scope the credentials are a member of, with its repository
/// count.
///
/// A scope whose uuid is the authenticated user's own is reported as a user
/// account; every other scope is an organization.
pub async fn validate_accounts(client: &BitbucketClient) -> Result<Vec<ConfigAccount>, AppError> {
    let workspaces = client.all_workspaces().await?;
    let me = client.current_user().await?;
    log::debug!(
        "[client] credentials belong to {}, member of {} scope(s)",
        me.uuid,
        workspaces.len()
    );

    let mut accounts = Vec::with_capacity(workspaces.len());
    for workspace in workspaces {
        let total_count = client
            .count_repositories(&workspace.slug)
            .await
            .map_err(|e| wrap_scope_error(&workspace.slug, e))?;

        let account_type = if workspace.uuid == me.uuid {
            AccountType::User
        } else {
            AccountType::Org
        };

        accounts.push(ConfigAccount {
            id: workspace.slug,
            account_type,
            name: workspace.name,
            description: None,
            avatar_url: workspace.links.avatar_href(),
            total_count,
            public: !workspace.is_private,
        });
    }

    Ok(accounts)
}

/// Prefix an error message with the scope it happened in.
fn wrap_scope_error(scope: &str, err: AppError) -> AppError {
    match err {
        AppError::Api {
            message,
            status_code,
            endpoint,
        } => AppError::Api {
            message: format!("error counting repositories for {}: {}", scope, message),
            status_code,
            endpoint,
        },
        AppError::Protocol { message, endpoint } => AppError::Protocol {
            message: format!("error counting repositories for {}: {}", scope, message),
            endpoint,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_scope_error_keeps_status() {
        let err = wrap_scope_error("acme", AppError::api_full("Access denied", 403, "repositories/acme"));
        assert_eq!(err.status_code(), Some(403));
        assert!(err.to_string().contains("error counting repositories for acme"));
    }

    #[test]
    fn test_wrap_scope_error_passes_auth_errors_through() {
        let err = wrap_scope_error("acme", AppError::authentication("rejected"));
        assert!(matches!(err, AppError::Authentication { .. }));
    }
}
