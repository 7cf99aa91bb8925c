//! Export error types.
//!
//! Every fatal condition in a run funnels into [`AppError`]. The variants are
//! serializable so a host runtime can report them as structured JSON.

use serde::Serialize;
use thiserror::Error;

/// Errors raised anywhere in an export run.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// Remote API returned a non-success status.
    #[error("Bitbucket API error: {message}")]
    Api {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// Transport failure: timeout, refused connection, reset.
    #[error("Network error: {message}")]
    Network { message: String },

    /// Credentials were rejected and cannot be refreshed.
    #[error("Authentication error: {message}")]
    Authentication { message: String },

    /// Token refresh failed, or the refreshed token was rejected as well.
    #[error("Token expired: {message}")]
    AuthenticationExpired { message: String },

    /// The remote API broke the pagination protocol.
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// A payload did not decode into the expected record shape.
    #[error("Conversion error ({entity}): {message}")]
    Conversion { entity: String, message: String },

    /// Downstream sink rejected a record.
    #[error("Sink error: {message}")]
    Sink { message: String },

    /// State store operation failed.
    #[error("State error: {message}")]
    State {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },

    /// Bad configuration, rejected before any request is made.
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// A spawned task panicked or a channel vanished.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    // Constructors, one per variant. Optional context has its own `_full` or
    // `_for_*` form.

    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
            status_code: None,
            endpoint: None,
        }
    }

    pub fn api_full(message: impl Into<String>, status_code: u16, endpoint: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
            status_code: Some(status_code),
            endpoint: Some(endpoint.into()),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication { message: message.into() }
    }

    pub fn authentication_expired(message: impl Into<String>) -> Self {
        Self::AuthenticationExpired { message: message.into() }
    }

    pub fn protocol(message: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            endpoint: Some(endpoint.into()),
        }
    }

    /// `entity` names the record kind that failed to decode.
    pub fn conversion(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conversion {
            entity: entity.into(),
            message: message.into(),
        }
    }

    pub fn sink(message: impl Into<String>) -> Self {
        Self::Sink { message: message.into() }
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
            key: None,
        }
    }

    pub fn state_for_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: None,
        }
    }

    /// `field` is the dotted config path, e.g. `auth.username`.
    pub fn invalid_input_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Rejected credentials, whether or not a refresh was attempted.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::AuthenticationExpired { .. }
        )
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    /// HTTP status of an [`AppError::Api`], if the response had one.
    pub fn status_code(&self) -> Option<u16> {
        if let Self::Api { status_code, .. } = self {
            *status_code
        } else {
            None
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::state(format!("state database: {}", err))
    }
}

impl From<crate::db::DbError> for AppError {
    fn from(err: crate::db::DbError) -> Self {
        Self::state(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let target = err
            .url()
            .map(|url| url.path().to_string())
            .unwrap_or_else(|| "Bitbucket".to_string());

        if err.is_timeout() {
            Self::network(format!("request to {} timed out", target))
        } else if err.is_connect() {
            Self::network(format!("could not connect to {}", target))
        } else if let Some(status) = err.status() {
            Self::Api {
                message: err.to_string(),
                status_code: Some(status.as_u16()),
                endpoint: Some(target),
            }
        } else if err.is_decode() {
            Self::conversion("response", err.to_string())
        } else {
            Self::network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::conversion("json", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_error_serializes_tagged() {
        let err = AppError::sink("pipe closed");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["type"], "Sink");
        assert_eq!(value["details"]["message"], "pipe closed");
    }

    #[test]
    fn test_api_error_keeps_status_and_endpoint() {
        let err = AppError::api_full("Not Found", 404, "repositories/acme");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["details"]["status_code"], 404);
        assert_eq!(value["details"]["endpoint"], "repositories/acme");
        assert_eq!(err.status_code(), Some(404));
    }

    #[test]
    fn test_protocol_error_carries_endpoint() {
        let err = AppError::protocol("no `page` in next link", "workspaces");
        assert!(err.is_protocol());
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["details"]["endpoint"], "workspaces");
    }

    #[test]
    fn test_state_error_without_key_omits_it() {
        let value = serde_json::to_value(AppError::state("locked")).unwrap();
        assert!(value["details"].get("key").is_none());

        let keyed = serde_json::to_value(AppError::state_for_key("bad value", "updated")).unwrap();
        assert_eq!(keyed["details"]["key"], "updated");
    }

    #[test]
    fn test_auth_failure_classification() {
        assert!(AppError::authentication("bad password").is_auth_failure());
        assert!(AppError::authentication_expired("refresh rejected").is_auth_failure());
        assert!(!AppError::network("reset").is_auth_failure());
        assert_eq!(AppError::network("reset").status_code(), None);
    }

    #[test]
    fn test_conversion_display_names_entity() {
        let err = AppError::conversion("pull_request", "missing field `id`");
        assert_eq!(
            err.to_string(),
            "Conversion error (pull_request): missing field `id`"
        );
    }

    #[test]
    fn test_json_error_becomes_conversion() {
        let err: AppError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, AppError::Conversion { ref entity, .. } if entity == "json"));
    }
}
