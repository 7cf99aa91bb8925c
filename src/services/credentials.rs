//! Credential providers for the Bitbucket API.
//!
//! Two schemes are supported:
//! - `Basic`: username and app password, header computed once, never refreshed
//! - `OAuth`: bearer access token plus a refresh token exchanged through a
//!   [`TokenRefresher`] when the API answers 401
//!
//! Only the `OAuth` variant can refresh; callers match on the variant instead
//! of probing the type at runtime.

use crate::error::AppError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

/// Token endpoint used by Bitbucket Cloud.
pub const DEFAULT_TOKEN_URL: &str = "https://bitbucket.org/site/oauth2/access_token";

/// Exchanges a refresh token for a new access token.
///
/// This is the token-manager collaborator owned by the host runtime.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh_access_token(
        &self,
        ref_type: &str,
        refresh_token: &str,
    ) -> Result<String, AppError>;
}

/// Credentials attached to every request.
#[derive(Clone)]
pub enum Credentials {
    Basic(BasicCreds),
    OAuth(Arc<OAuthCreds>),
}

impl Credentials {
    /// Build basic credentials from a username and secret.
    pub fn basic(username: &str, password: &str) -> Self {
        Self::Basic(BasicCreds::new(username, password))
    }

    /// Build refreshable credentials.
    pub fn oauth(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self::OAuth(Arc::new(OAuthCreds::new(
            access_token,
            refresh_token,
            refresher,
        )))
    }

    /// Value of the `Authorization` header for the next request.
    pub fn authorization_header(&self) -> String {
        match self {
            Self::Basic(creds) => creds.header.clone(),
            Self::OAuth(creds) => creds.authorization_header(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic(_) => f.write_str("Credentials::Basic(..)"),
            Self::OAuth(_) => f.write_str("Credentials::OAuth(..)"),
        }
    }
}

/// Basic authorization: username and password.
#[derive(Clone)]
pub struct BasicCreds {
    header: String,
}

impl BasicCreds {
    pub fn new(username: &str, password: &str) -> Self {
        let encoded = STANDARD.encode(format!("{}:{}", username, password));
        Self {
            header: format!("Basic {}", encoded),
        }
    }
}

/// OAuth2 bearer credentials with a refresh token.
pub struct OAuthCreds {
    token: RwLock<String>,
    /// Held across the check and the exchange so concurrent 401s refresh once.
    refreshing: Mutex<()>,
    refresh_token: String,
    refresher: Arc<dyn TokenRefresher>,
}

impl OAuthCreds {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self {
            token: RwLock::new(access_token.into()),
            refreshing: Mutex::new(()),
            refresh_token: refresh_token.into(),
            refresher,
        }
    }

    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.current_token())
    }

    fn current_token(&self) -> String {
        match self.token.read() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Exchange the refresh token and replace the current access token.
    ///
    /// `rejected_header` is the header that just got a 401. Refreshes are
    /// serialized: a caller that waited behind another refresh finds the token
    /// already replaced and keeps the newer one without an exchange.
    pub async fn refresh(&self, ref_type: &str, rejected_header: &str) -> Result<(), AppError> {
        let _guard = self.refreshing.lock().await;
        if self.authorization_header() != rejected_header {
            log::debug!("[client] access token already refreshed by another request");
            return Ok(());
        }

        log::info!("[client] refreshing OAuth access token");
        let token = self
            .refresher
            .refresh_access_token(ref_type, &self.refresh_token)
            .await
            .map_err(|e| {
                log::error!("[client] token refresh failed: {}", e);
                AppError::authentication_expired(format!("Token refresh failed: {}", e))
            })?;

        match self.token.write() {
            Ok(mut current) => *current = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
        Ok(())
    }
}

/// Token refresher that calls the provider's OAuth2 token endpoint.
#[derive(Debug, Clone)]
pub struct OAuthTokenEndpoint {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl OAuthTokenEndpoint {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }
}

#[async_trait]
impl TokenRefresher for OAuthTokenEndpoint {
    async fn refresh_access_token(
        &self,
        _ref_type: &str,
        refresh_token: &str,
    ) -> Result<String, AppError> {
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::authentication_expired(format!(
                "Token endpoint returned {}",
                status.as_u16()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::authentication_expired(format!("Invalid token response: {}", e)))?;

        Ok(body.access_token)
    }
}
